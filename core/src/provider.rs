// songforge/src/provider.rs

//! Contract of the external song-generation provider.

use crate::error::ForgeResult;
use crate::models::{OrderItem, SubmissionMode};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the provider returned for one submitted item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
  pub task_ids: Vec<String>,
  /// `Webhook` iff the provider accepted the callback URL for this call.
  pub mode: SubmissionMode,
}

impl Submission {
  pub fn from_response(task_ids: Vec<String>, callback_accepted: bool) -> Self {
    Self {
      task_ids,
      mode: if callback_accepted {
        SubmissionMode::Webhook
      } else {
        SubmissionMode::Polling
      },
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TaskState {
  Pending,
  Running,
  Succeeded,
  Failed(String),
}

impl TaskState {
  pub fn is_terminal(&self) -> bool {
    matches!(self, TaskState::Succeeded | TaskState::Failed(_))
  }

  /// Maps a wire state string. Vendors disagree on naming, so progress
  /// markers (`TEXT_SUCCESS`, `FIRST_SUCCESS`) count as running and any
  /// `*_FAILED` / `*_ERROR` / `*_EXCEPTION` counts as failure.
  pub fn from_wire(state: &str, error: Option<&str>) -> Option<Self> {
    let normalized = state.trim().to_ascii_lowercase();
    let failure = || TaskState::Failed(error.unwrap_or(&normalized).to_string());
    match normalized.as_str() {
      "pending" | "queued" | "submitted" => Some(TaskState::Pending),
      "running" | "processing" | "generating" | "text_success" | "first_success" => Some(TaskState::Running),
      "succeeded" | "success" | "completed" | "complete" => Some(TaskState::Succeeded),
      "failed" | "failure" | "error" => Some(failure()),
      s if s.ends_with("_failed") || s.ends_with("_error") || s.ends_with("_exception") => Some(failure()),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
  pub task_id: String,
  pub state: TaskState,
  pub audio_url: Option<String>,
  pub image_url: Option<String>,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
  /// Submits one item. `callback_url` is offered to the provider; whether it
  /// was accepted decides the job's mode.
  async fn submit(&self, item: &OrderItem, callback_url: Option<&str>) -> ForgeResult<Submission>;

  async fn status(&self, task_id: &str) -> ForgeResult<TaskStatus>;
}
