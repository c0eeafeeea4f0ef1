// songforge/src/models/job.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Generating,
  Completed,
  Failed,
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, JobStatus::Generating)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      JobStatus::Generating => "generating",
      JobStatus::Completed => "completed",
      JobStatus::Failed => "failed",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "generating" => Some(JobStatus::Generating),
      "completed" => Some(JobStatus::Completed),
      "failed" => Some(JobStatus::Failed),
      _ => None,
    }
  }
}

/// How a job's completion is discovered. Decided per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
  Webhook,
  Polling,
}

impl SubmissionMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      SubmissionMode::Webhook => "webhook",
      SubmissionMode::Polling => "polling",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "webhook" => Some(SubmissionMode::Webhook),
      "polling" => Some(SubmissionMode::Polling),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
  pub audio_url: String,
  pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
  /// The provider refused the request; no wait was spent.
  SubmissionRejected(String),
  /// A status poll or webhook reported failure.
  ProviderFailure(String),
  /// The polling budget elapsed.
  Timeout,
  /// The provider reported success without an audio location.
  MissingArtifact,
}

impl std::fmt::Display for FailureReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      FailureReason::SubmissionRejected(detail) => write!(f, "submission rejected: {}", detail),
      FailureReason::ProviderFailure(detail) => write!(f, "provider failure: {}", detail),
      FailureReason::Timeout => write!(f, "timeout"),
      FailureReason::MissingArtifact => write!(f, "missing artifact"),
    }
  }
}

/// The single terminal transition a job ever makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
  Completed(Artifact),
  Failed(FailureReason),
}

impl JobOutcome {
  pub fn status(&self) -> JobStatus {
    match self {
      JobOutcome::Completed(_) => JobStatus::Completed,
      JobOutcome::Failed(_) => JobStatus::Failed,
    }
  }
}

/// One order item's generation attempt.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
  pub id: Uuid,
  pub order_id: Uuid,
  pub order_item_id: Uuid,
  /// Empty until submission; a provider may return several variants.
  pub task_ids: Vec<String>,
  pub status: JobStatus,
  /// Unset until submission, then fixed.
  pub mode: Option<SubmissionMode>,
  pub artifact: Option<Artifact>,
  pub failure: Option<FailureReason>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
  pub fn new(order_id: Uuid, order_item_id: Uuid) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      order_id,
      order_item_id,
      task_ids: Vec::new(),
      status: JobStatus::Generating,
      mode: None,
      artifact: None,
      failure: None,
      created_at: now,
      updated_at: now,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  /// Applies a terminal outcome in place. Callers hold the store's guard.
  pub(crate) fn apply_outcome(&mut self, outcome: JobOutcome) {
    self.status = outcome.status();
    match outcome {
      JobOutcome::Completed(artifact) => self.artifact = Some(artifact),
      JobOutcome::Failed(reason) => self.failure = Some(reason),
    }
    self.updated_at = Utc::now();
  }
}
