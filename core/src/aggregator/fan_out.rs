// songforge/src/aggregator/fan_out.rs

//! The fan-out pipeline: paid order in, one submitted job per item out.

use crate::aggregator::{OrderAggregator, Settlement};
use crate::error::{ForgeError, ForgeResult};
use crate::models::{FailureReason, GenerationJob, JobOutcome, JobStatus, OrderItem, SubmissionMode};
use crate::pipeline::{ContextData, Pipeline, PipelineControl};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const LOAD_PAID_ORDER: &str = "load_paid_order";
const CREATE_GENERATION_JOBS: &str = "create_generation_jobs";
const SUBMIT_GENERATION_REQUESTS: &str = "submit_generation_requests";
const DISPATCH_COMPLETION_TRACKING: &str = "dispatch_completion_tracking";

/// Where one job stands right after fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobDispatch {
  pub job_id: Uuid,
  pub order_item_id: Uuid,
  pub mode: Option<SubmissionMode>,
  pub status: JobStatus,
  pub task_ids: Vec<String>,
}

impl From<&GenerationJob> for JobDispatch {
  fn from(job: &GenerationJob) -> Self {
    Self {
      job_id: job.id,
      order_item_id: job.order_item_id,
      mode: job.mode,
      status: job.status,
      task_ids: job.task_ids.clone(),
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct FanOutReport {
  pub order_id: Uuid,
  /// False when an earlier trigger had already fanned this order out.
  pub newly_started: bool,
  pub jobs: Vec<JobDispatch>,
  pub settlement: Option<Settlement>,
}

impl FanOutReport {
  pub fn count_mode(&self, mode: SubmissionMode) -> usize {
    self.jobs.iter().filter(|j| j.mode == Some(mode)).count()
  }
}

pub struct FanOutCtxData {
  pub aggregator: Arc<OrderAggregator>,
  pub order_id: Uuid,
  /// Items this run submits. On a repeated trigger, only those an earlier
  /// run left without a submitted job.
  pub items: Vec<OrderItem>,
  /// Jobs for `items`, same index once created; afterwards the jobs whose
  /// submission went through.
  pub jobs: Vec<GenerationJob>,
  /// Jobs an earlier run already submitted, left untouched by this one.
  pub existing: Vec<GenerationJob>,
  pub already_started: bool,
  /// First submission whose bookkeeping failed; reported once tracking for
  /// the rest of the cohort is in place.
  pub submit_error: Option<ForgeError>,
  pub settlement: Option<Settlement>,
}

impl FanOutCtxData {
  pub fn new(aggregator: Arc<OrderAggregator>, order_id: Uuid) -> Self {
    Self {
      aggregator,
      order_id,
      items: Vec::new(),
      jobs: Vec::new(),
      existing: Vec::new(),
      already_started: false,
      submit_error: None,
      settlement: None,
    }
  }

  pub fn report(&self) -> FanOutReport {
    FanOutReport {
      order_id: self.order_id,
      newly_started: !self.already_started,
      jobs: self.existing.iter().chain(self.jobs.iter()).map(JobDispatch::from).collect(),
      settlement: self.settlement,
    }
  }
}

/// Whether an earlier fan-out left this item without a submitted job.
fn needs_submission(item: &OrderItem, existing: &[GenerationJob]) -> bool {
  match existing.iter().find(|j| j.order_item_id == item.id) {
    Some(job) => !job.is_terminal() && job.mode.is_none(),
    None => true,
  }
}

pub(crate) fn build_fan_out_pipeline() -> Pipeline<FanOutCtxData> {
  let mut p = Pipeline::<FanOutCtxData>::new(
    "fan_out",
    &[
      (LOAD_PAID_ORDER, false),
      (CREATE_GENERATION_JOBS, false),
      (SUBMIT_GENERATION_REQUESTS, false),
      (DISPATCH_COMPLETION_TRACKING, false),
    ],
  );

  p.on_root(LOAD_PAID_ORDER, |ctx_data: ContextData<FanOutCtxData>| async move {
    let (aggregator, order_id) = {
      let guard = ctx_data.read();
      (guard.aggregator.clone(), guard.order_id)
    };

    let order = aggregator.orders.get_order(order_id).await?;
    if order.payment_reference.as_deref().map_or(true, str::is_empty) {
      return Err(ForgeError::PaymentNotConfirmed { order_id });
    }
    let items = aggregator.orders.order_items(order_id).await?;
    if items.is_empty() {
      return Err(ForgeError::EmptyOrder { order_id });
    }

    if aggregator.orders.begin_fan_out(order_id).await? {
      ctx_data.write().items = items;
      return Ok(PipelineControl::Continue);
    }

    let existing = aggregator.jobs.jobs_for_order(order_id).await?;
    let remaining: Vec<OrderItem> = items
      .into_iter()
      .filter(|item| needs_submission(item, &existing))
      .collect();
    if remaining.is_empty() {
      info!(%order_id, jobs = existing.len(), "Fan-out already started for order; not resubmitting.");
      let settlement = aggregator.check_settlement(order_id).await?;
      let mut guard = ctx_data.write();
      guard.already_started = true;
      guard.existing = existing;
      guard.settlement = Some(settlement);
      return Ok(PipelineControl::Stop);
    }

    let kept: Vec<GenerationJob> = existing
      .into_iter()
      .filter(|j| !remaining.iter().any(|item| item.id == j.order_item_id))
      .collect();
    info!(%order_id, unsubmitted = remaining.len(), "Resuming an interrupted fan-out for the unsubmitted items.");
    let mut guard = ctx_data.write();
    guard.already_started = true;
    guard.items = remaining;
    guard.existing = kept;
    Ok::<_, ForgeError>(PipelineControl::Continue)
  });

  p.on_root(CREATE_GENERATION_JOBS, |ctx_data: ContextData<FanOutCtxData>| async move {
    let (aggregator, order_id, item_ids) = {
      let guard = ctx_data.read();
      let item_ids: Vec<Uuid> = guard.items.iter().map(|i| i.id).collect();
      (guard.aggregator.clone(), guard.order_id, item_ids)
    };

    let mut jobs = Vec::with_capacity(item_ids.len());
    for item_id in item_ids {
      jobs.push(aggregator.jobs.create_job(order_id, item_id).await?);
    }
    info!(%order_id, jobs = jobs.len(), "Generation jobs created.");
    ctx_data.write().jobs = jobs;
    Ok::<_, ForgeError>(PipelineControl::Continue)
  });

  p.on_root(SUBMIT_GENERATION_REQUESTS, |ctx_data: ContextData<FanOutCtxData>| async move {
    let (aggregator, order_id, items, jobs) = {
      let guard = ctx_data.read();
      (guard.aggregator.clone(), guard.order_id, guard.items.clone(), guard.jobs.clone())
    };

    // All items go out at once; the cohort waits on its slowest submission only.
    let submitted = join_all(
      items
        .iter()
        .zip(jobs.iter())
        .map(|(item, job)| submit_one(&aggregator, item, job)),
    )
    .await;

    // One item's failure must not cost the others their tracking.
    let mut refreshed = Vec::with_capacity(submitted.len());
    let mut first_error = None;
    for result in submitted {
      match result {
        Ok(job) => refreshed.push(job),
        Err(e) => {
          error!(%order_id, error = %e, "Submission bookkeeping failed for an item.");
          first_error.get_or_insert(e);
        }
      }
    }
    let mut guard = ctx_data.write();
    guard.jobs = refreshed;
    guard.submit_error = first_error;
    Ok::<_, ForgeError>(PipelineControl::Continue)
  });

  p.on_root(DISPATCH_COMPLETION_TRACKING, |ctx_data: ContextData<FanOutCtxData>| async move {
    let (aggregator, order_id, jobs) = {
      let guard = ctx_data.read();
      (guard.aggregator.clone(), guard.order_id, guard.jobs.clone())
    };

    // Webhook-mode jobs need nothing here: ingest drives them. Polling-mode
    // jobs each get their own waiter; there is no order-wide sweep.
    let mut polling = 0;
    for job in jobs.iter().filter(|j| !j.is_terminal() && j.mode == Some(SubmissionMode::Polling)) {
      aggregator.spawn_waiter(job.clone());
      polling += 1;
    }
    let webhook = jobs.iter().filter(|j| j.mode == Some(SubmissionMode::Webhook)).count();
    info!(%order_id, polling, webhook, "Completion tracking dispatched.");

    let settlement = aggregator.check_settlement(order_id).await?;
    let mut guard = ctx_data.write();
    guard.settlement = Some(settlement);
    if let Some(e) = guard.submit_error.take() {
      return Err(e);
    }
    Ok::<_, ForgeError>(PipelineControl::Continue)
  });

  p
}

/// Submits one item and records the result on its job. A rejected
/// submission fails the job on the spot; no waiter is ever started for it.
/// A submission that cannot be recorded fails the job the same way.
async fn submit_one(aggregator: &Arc<OrderAggregator>, item: &OrderItem, job: &GenerationJob) -> ForgeResult<GenerationJob> {
  let callback_url = aggregator.settings.callback_url.as_deref();
  let failure = match aggregator.provider.submit(item, callback_url).await {
    Ok(submission) if !submission.task_ids.is_empty() => {
      match aggregator
        .jobs
        .record_submission(job.id, &submission.task_ids, submission.mode)
        .await
      {
        Ok(true) => {
          info!(
            job_id = %job.id,
            order_item_id = %item.id,
            mode = submission.mode.as_str(),
            tasks = submission.task_ids.len(),
            "Item submitted to provider."
          );
          None
        }
        Ok(false) => {
          // The job's recorded state stands; these task ids belong to no job.
          warn!(job_id = %job.id, order_item_id = %item.id, tasks = ?submission.task_ids, "Submission not recorded; job was already submitted or terminal.");
          return Err(ForgeError::Internal(format!(
            "submission for job {} was not recorded: job already submitted or terminal",
            job.id
          )));
        }
        Err(e) => Some(format!("could not record submission: {}", e)),
      }
    }
    Ok(_) => Some("provider returned no task ids".to_string()),
    Err(e) => Some(e.to_string()),
  };

  if let Some(detail) = failure {
    warn!(job_id = %job.id, order_item_id = %item.id, error = %detail, "Submission failed; failing job.");
    aggregator
      .terminalize(job.id, job.order_id, JobOutcome::Failed(FailureReason::SubmissionRejected(detail)))
      .await?;
  }

  aggregator.jobs.get_job(job.id).await
}
