// songforge/src/waiter.rs

//! Bounded polling for jobs whose provider did not accept a callback.

use crate::error::ForgeResult;
use crate::models::{Artifact, FailureReason, GenerationJob, JobOutcome};
use crate::provider::{GenerationProvider, TaskState, TaskStatus};
use crate::store::JobStore;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitResult {
  /// The waiter reached a verdict; the caller records it.
  Outcome(JobOutcome),
  /// Another channel terminalized the job while we were polling.
  AlreadyTerminal,
  /// Shutdown was requested. The job is left generating for a later resume.
  Cancelled,
}

pub struct CompletionWaiter {
  provider: Arc<dyn GenerationProvider>,
  jobs: Arc<dyn JobStore>,
  poll_interval: Duration,
  wait_budget: Duration,
}

impl CompletionWaiter {
  pub fn new(
    provider: Arc<dyn GenerationProvider>,
    jobs: Arc<dyn JobStore>,
    poll_interval: Duration,
    wait_budget: Duration,
  ) -> Self {
    Self {
      provider,
      jobs,
      poll_interval,
      wait_budget,
    }
  }

  /// Polls until the job settles, the budget elapses, or `cancel` fires.
  ///
  /// Exceeding the budget always yields `Failed(Timeout)`: a job left
  /// generating would block its order's settlement forever.
  #[instrument(
    name = "CompletionWaiter::wait",
    skip(self, job, cancel),
    fields(job_id = %job.id, order_id = %job.order_id, tasks = job.task_ids.len())
  )]
  pub async fn wait(&self, job: &GenerationJob, cancel: &CancellationToken) -> WaitResult {
    tokio::select! {
      _ = cancel.cancelled() => {
        info!("Wait cancelled; job stays generating.");
        WaitResult::Cancelled
      }
      polled = tokio::time::timeout(self.wait_budget, self.poll_until_settled(job)) => match polled {
        Ok(result) => result,
        Err(_elapsed) => {
          warn!(budget_secs = self.wait_budget.as_secs_f64(), "Wait budget exhausted.");
          WaitResult::Outcome(JobOutcome::Failed(FailureReason::Timeout))
        }
      },
    }
  }

  async fn poll_until_settled(&self, job: &GenerationJob) -> WaitResult {
    if job.task_ids.is_empty() {
      return WaitResult::Outcome(JobOutcome::Failed(FailureReason::ProviderFailure(
        "job has no provider tasks".to_string(),
      )));
    }

    let mut attempt: u32 = 0;
    loop {
      attempt += 1;

      match self.jobs.get_job(job.id).await {
        Ok(current) if current.is_terminal() => {
          debug!(attempt, "Job settled through another channel.");
          return WaitResult::AlreadyTerminal;
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not re-read job; polling anyway."),
      }

      let statuses = join_all(job.task_ids.iter().map(|task_id| self.provider.status(task_id))).await;
      if let Some(outcome) = outcome_from_statuses(&statuses) {
        debug!(attempt, status = outcome.status().as_str(), "Polling reached a verdict.");
        return WaitResult::Outcome(outcome);
      }

      tokio::time::sleep(self.poll_interval).await;
    }
  }
}

/// Verdict over all of a job's tasks, or `None` while any is still in flight.
///
/// One failed task fails the job. Status-call errors are transient: they keep
/// the job in flight and are retried on the next poll.
pub(crate) fn outcome_from_statuses(statuses: &[ForgeResult<TaskStatus>]) -> Option<JobOutcome> {
  let mut all_succeeded = true;
  for status in statuses {
    match status {
      Err(e) => {
        warn!(error = %e, "Status poll failed; will retry.");
        all_succeeded = false;
      }
      Ok(TaskStatus {
        state: TaskState::Failed(detail),
        ..
      }) => return Some(JobOutcome::Failed(FailureReason::ProviderFailure(detail.clone()))),
      Ok(TaskStatus {
        state: TaskState::Succeeded,
        ..
      }) => {}
      Ok(_) => all_succeeded = false,
    }
  }
  if !all_succeeded {
    return None;
  }

  let artifact = statuses.iter().filter_map(|s| s.as_ref().ok()).find_map(artifact_of);
  Some(match artifact {
    Some(artifact) => JobOutcome::Completed(artifact),
    None => JobOutcome::Failed(FailureReason::MissingArtifact),
  })
}

pub(crate) fn artifact_of(status: &TaskStatus) -> Option<Artifact> {
  status.audio_url.as_ref().filter(|url| !url.is_empty()).map(|audio_url| Artifact {
    audio_url: audio_url.clone(),
    image_url: status.image_url.clone(),
  })
}
