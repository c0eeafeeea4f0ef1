// songforge/src/ingest.rs

//! Provider push notifications.
//!
//! Ingest only touches the store: it never waits on a job and never on email
//! delivery, which the notifier handles on its own worker.

use crate::aggregator::{OrderAggregator, Settlement};
use crate::error::ForgeError;
use crate::models::{FailureReason, GenerationJob, JobOutcome, JobStatus};
use crate::pipeline::{ContextData, Pipeline, PipelineControl};
use crate::provider::{TaskState, TaskStatus};
use crate::waiter::artifact_of;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// A decoded provider callback. Transport framing is the caller's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCallback {
  pub task_id: String,
  pub state: TaskState,
  pub audio_url: Option<String>,
  pub image_url: Option<String>,
}

impl From<TaskStatus> for ProviderCallback {
  fn from(status: TaskStatus) -> Self {
    Self {
      task_id: status.task_id,
      state: status.state,
      audio_url: status.audio_url,
      image_url: status.image_url,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
  /// No job carries this task id (yet). The provider should retry later.
  UnknownTask,
  /// The job was already terminal; nothing changed on the job. The order's
  /// settlement is still re-checked.
  AlreadyTerminal { job_id: Uuid },
  /// A progress callback; nothing recorded.
  InProgress { job_id: Uuid },
  Recorded {
    job_id: Uuid,
    status: JobStatus,
    settlement: Settlement,
  },
}

pub struct IngestCtxData {
  pub aggregator: Arc<OrderAggregator>,
  pub callback: ProviderCallback,
  pub job: Option<GenerationJob>,
  pub recorded_status: Option<JobStatus>,
  /// Set when the job was terminal before this delivery applied anything.
  pub already_terminal: bool,
  pub outcome: Option<IngestOutcome>,
}

pub struct WebhookIngest {
  aggregator: Arc<OrderAggregator>,
  pipeline: Pipeline<IngestCtxData>,
}

impl WebhookIngest {
  pub fn new(aggregator: Arc<OrderAggregator>) -> Self {
    Self {
      aggregator,
      pipeline: build_ingest_pipeline(),
    }
  }

  #[instrument(
    name = "WebhookIngest::ingest",
    skip(self, callback),
    fields(task_id = %callback.task_id),
    err(Display)
  )]
  pub async fn ingest(&self, callback: ProviderCallback) -> Result<IngestOutcome, ForgeError> {
    let ctx = ContextData::new(IngestCtxData {
      aggregator: self.aggregator.clone(),
      callback,
      job: None,
      recorded_status: None,
      already_terminal: false,
      outcome: None,
    });
    self.pipeline.run(ctx.clone()).await?;
    let outcome = ctx.read().outcome.clone();
    outcome.ok_or_else(|| ForgeError::Internal("ingest pipeline finished without an outcome".to_string()))
  }
}

/// Terminal outcome carried by a callback, `None` for progress callbacks.
/// For multi-variant jobs the first successful variant with audio completes the job.
fn outcome_from_callback(callback: &ProviderCallback) -> Option<JobOutcome> {
  match &callback.state {
    TaskState::Pending | TaskState::Running => None,
    TaskState::Failed(detail) => Some(JobOutcome::Failed(FailureReason::ProviderFailure(detail.clone()))),
    TaskState::Succeeded => {
      let status = TaskStatus {
        task_id: callback.task_id.clone(),
        state: TaskState::Succeeded,
        audio_url: callback.audio_url.clone(),
        image_url: callback.image_url.clone(),
      };
      Some(match artifact_of(&status) {
        Some(artifact) => JobOutcome::Completed(artifact),
        None => JobOutcome::Failed(FailureReason::MissingArtifact),
      })
    }
  }
}

fn build_ingest_pipeline() -> Pipeline<IngestCtxData> {
  let mut p = Pipeline::<IngestCtxData>::new(
    "provider_callback",
    &[("resolve_job", false), ("apply_provider_update", false), ("recheck_settlement", false)],
  );

  p.on_root("resolve_job", |ctx_data: ContextData<IngestCtxData>| async move {
    let (aggregator, task_id) = {
      let guard = ctx_data.read();
      (guard.aggregator.clone(), guard.callback.task_id.clone())
    };

    let job = match aggregator.jobs.find_by_task_id(&task_id).await? {
      Some(job) => job,
      None => {
        warn!(%task_id, "Callback for unknown provider task.");
        ctx_data.write().outcome = Some(IngestOutcome::UnknownTask);
        return Ok(PipelineControl::Stop);
      }
    };

    let mut guard = ctx_data.write();
    if job.is_terminal() {
      // A redelivery may be the only trigger left for an order whose
      // settlement check failed after the job was recorded.
      debug!(job_id = %job.id, "Job already terminal; re-checking its order only.");
      guard.already_terminal = true;
    }
    guard.job = Some(job);
    Ok::<_, ForgeError>(PipelineControl::Continue)
  });

  p.on_root("apply_provider_update", |ctx_data: ContextData<IngestCtxData>| async move {
    let (aggregator, callback, job_id, already_terminal) = {
      let guard = ctx_data.read();
      let job_id = guard.job.as_ref().map(|j| j.id);
      (guard.aggregator.clone(), guard.callback.clone(), job_id, guard.already_terminal)
    };
    if already_terminal {
      return Ok(PipelineControl::Continue);
    }
    let job_id = job_id.ok_or_else(|| ForgeError::Internal("apply_provider_update ran without a job".to_string()))?;

    let outcome = match outcome_from_callback(&callback) {
      Some(outcome) => outcome,
      None => {
        debug!(%job_id, state = ?callback.state, "Progress callback; nothing to record.");
        ctx_data.write().outcome = Some(IngestOutcome::InProgress { job_id });
        return Ok(PipelineControl::Stop);
      }
    };

    let status = outcome.status();
    if !aggregator.jobs.try_terminalize(job_id, outcome).await? {
      // Lost the race to the waiter or a duplicate delivery.
      debug!(%job_id, "Job terminalized concurrently; re-checking its order only.");
      ctx_data.write().already_terminal = true;
      return Ok(PipelineControl::Continue);
    }
    info!(%job_id, status = status.as_str(), "Job terminalized from provider callback.");
    ctx_data.write().recorded_status = Some(status);
    Ok::<_, ForgeError>(PipelineControl::Continue)
  });

  p.on_root("recheck_settlement", |ctx_data: ContextData<IngestCtxData>| async move {
    let (aggregator, job, status, already_terminal) = {
      let guard = ctx_data.read();
      (guard.aggregator.clone(), guard.job.clone(), guard.recorded_status, guard.already_terminal)
    };
    let job = job.ok_or_else(|| ForgeError::Internal("recheck_settlement ran without a job".to_string()))?;

    let settlement = aggregator.check_settlement(job.order_id).await?;
    let outcome = match status {
      Some(status) if !already_terminal => IngestOutcome::Recorded {
        job_id: job.id,
        status,
        settlement,
      },
      _ => {
        if let Settlement::Settled { claimed: true, .. } = settlement {
          info!(job_id = %job.id, order_id = %job.order_id, "Redelivery settled an order left unsettled.");
        }
        IngestOutcome::AlreadyTerminal { job_id: job.id }
      }
    };
    ctx_data.write().outcome = Some(outcome);
    Ok::<_, ForgeError>(PipelineControl::Continue)
  });

  p
}
