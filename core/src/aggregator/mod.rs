// songforge/src/aggregator/mod.rs

//! Order-level coordination: fan-out, per-job completion tracking and the
//! single settlement check every terminalizing channel goes through.

pub mod fan_out;

pub use fan_out::{FanOutReport, JobDispatch};

use crate::error::ForgeResult;
use crate::models::{GenerationJob, JobOutcome, JobStatus, NotificationStatus, Order, OrderStatus};
use crate::notifier::NotificationQueue;
use crate::pipeline::{ContextData, Pipeline};
use crate::provider::GenerationProvider;
use crate::settings::OrchestratorSettings;
use crate::store::{JobStore, OrderStore};
use crate::waiter::{CompletionWaiter, WaitResult};
use fan_out::FanOutCtxData;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Attempts a background waiter makes at recording its outcome and settling
/// the order before leaving it to a later channel.
const RECORD_ATTEMPTS: u32 = 3;

/// Result of one settlement check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Settlement {
  Unsettled { pending: usize },
  /// `claimed` is true only for the one check that won the notification claim.
  Settled { status: OrderStatus, claimed: bool },
}

impl Settlement {
  pub fn is_settled(&self) -> bool {
    matches!(self, Settlement::Settled { .. })
  }
}

/// Per-order outcome of a fully terminal cohort.
pub fn classify(jobs: &[GenerationJob]) -> OrderStatus {
  let completed = jobs
    .iter()
    .filter(|j| j.status == JobStatus::Completed && j.artifact.is_some())
    .count();
  if completed == jobs.len() {
    OrderStatus::Fulfilled
  } else if completed == 0 {
    OrderStatus::Failed
  } else {
    OrderStatus::PartiallyFulfilled
  }
}

/// Marks an order as fanning out until dropped.
struct FanOutGuard<'a> {
  running: &'a Mutex<HashSet<Uuid>>,
  order_id: Uuid,
}

impl<'a> FanOutGuard<'a> {
  fn acquire(running: &'a Mutex<HashSet<Uuid>>, order_id: Uuid) -> Option<Self> {
    running.lock().insert(order_id).then(|| Self { running, order_id })
  }
}

impl Drop for FanOutGuard<'_> {
  fn drop(&mut self) {
    self.running.lock().remove(&self.order_id);
  }
}

pub struct OrderAggregator {
  pub(crate) provider: Arc<dyn GenerationProvider>,
  pub(crate) jobs: Arc<dyn JobStore>,
  pub(crate) orders: Arc<dyn OrderStore>,
  pub(crate) settings: OrchestratorSettings,
  waiter: CompletionWaiter,
  notifications: NotificationQueue,
  fan_out_pipeline: Pipeline<FanOutCtxData>,
  /// Orders with a fan-out running in this process.
  fanning_out: Mutex<HashSet<Uuid>>,
  cancel: CancellationToken,
  tracker: TaskTracker,
}

impl OrderAggregator {
  pub fn new(
    provider: Arc<dyn GenerationProvider>,
    jobs: Arc<dyn JobStore>,
    orders: Arc<dyn OrderStore>,
    notifications: NotificationQueue,
    settings: OrchestratorSettings,
    cancel: CancellationToken,
    tracker: TaskTracker,
  ) -> Arc<Self> {
    let waiter = CompletionWaiter::new(
      provider.clone(),
      jobs.clone(),
      settings.poll_interval,
      settings.wait_budget,
    );
    Arc::new(Self {
      provider,
      jobs,
      orders,
      settings,
      waiter,
      notifications,
      fan_out_pipeline: fan_out::build_fan_out_pipeline(),
      fanning_out: Mutex::new(HashSet::new()),
      cancel,
      tracker,
    })
  }

  /// Starts generation for every item of a paid order.
  ///
  /// A repeated call for the same order reports the jobs the first call
  /// created and only submits items an interrupted earlier call left
  /// without a submitted job. A call overlapping one still running in this
  /// process submits nothing.
  #[instrument(name = "OrderAggregator::fan_out", skip(self), err(Display))]
  pub async fn fan_out(self: &Arc<Self>, order_id: Uuid) -> ForgeResult<FanOutReport> {
    let _running = match FanOutGuard::acquire(&self.fanning_out, order_id) {
      Some(guard) => guard,
      None => {
        debug!("Fan-out for this order is already running.");
        let jobs = self.jobs.jobs_for_order(order_id).await?;
        return Ok(FanOutReport {
          order_id,
          newly_started: false,
          jobs: jobs.iter().map(JobDispatch::from).collect(),
          settlement: None,
        });
      }
    };

    let ctx = ContextData::new(FanOutCtxData::new(Arc::clone(self), order_id));
    let result = self.fan_out_pipeline.run(ctx.clone()).await?;
    debug!(?result, "Fan-out pipeline finished.");
    let report = ctx.read().report();
    Ok(report)
  }

  /// Idempotent; safe to call concurrently from any channel.
  ///
  /// When every job of the order is terminal, the cohort is classified and
  /// the order's notification is claimed with a compare-and-set. Only the
  /// winning caller enqueues the customer notification.
  #[instrument(name = "OrderAggregator::check_settlement", skip(self), err(Display))]
  pub async fn check_settlement(&self, order_id: Uuid) -> ForgeResult<Settlement> {
    let items = self.orders.order_items(order_id).await?;
    let jobs = self.jobs.jobs_for_order(order_id).await?;

    // A short cohort means fan-out has not created every job yet, or was
    // interrupted before it did.
    let pending = jobs.iter().filter(|j| !j.is_terminal()).count() + items.len().saturating_sub(jobs.len());
    if pending > 0 || jobs.is_empty() {
      debug!(pending, "Order not settled yet.");
      return Ok(Settlement::Unsettled { pending });
    }

    let status = classify(&jobs);
    let claimed = self.orders.claim_settlement(order_id, status).await?;
    if claimed {
      info!(status = status.as_str(), jobs = jobs.len(), "Order settled; notification queued.");
      if let Err(e) = self.notifications.enqueue(order_id) {
        // The claim is already taken; leave the order where a retry finds it.
        let detail = e.to_string();
        warn!(error = %detail, "Notification could not be queued; marking it failed for retry.");
        self
          .orders
          .record_notification(order_id, NotificationStatus::Failed, None, Some(&detail))
          .await?;
      }
    } else {
      debug!("Order already settled by another channel.");
    }
    Ok(Settlement::Settled { status, claimed })
  }

  /// Records a job's terminal outcome and re-checks the owning order.
  /// Returns whether this call applied the outcome.
  ///
  /// The order is re-checked even when the job was already terminal, so a
  /// repeated call repairs a settlement check that failed the first time.
  pub async fn terminalize(&self, job_id: Uuid, order_id: Uuid, outcome: JobOutcome) -> ForgeResult<bool> {
    let applied = self.jobs.try_terminalize(job_id, outcome).await?;
    self.check_settlement(order_id).await?;
    Ok(applied)
  }

  /// Starts a background waiter for one polling-mode job.
  pub(crate) fn spawn_waiter(self: &Arc<Self>, job: GenerationJob) {
    let this = Arc::clone(self);
    let cancel = self.cancel.child_token();
    self.tracker.spawn(async move {
      match this.waiter.wait(&job, &cancel).await {
        WaitResult::Outcome(outcome) => this.record_polled(&job, outcome, &cancel).await,
        WaitResult::AlreadyTerminal | WaitResult::Cancelled => {}
      }
    });
  }

  /// A waiter is the only channel that will ever report a polling job, so a
  /// failed write is retried a few times, one poll interval apart.
  async fn record_polled(&self, job: &GenerationJob, outcome: JobOutcome, cancel: &CancellationToken) {
    for attempt in 1..=RECORD_ATTEMPTS {
      match self.terminalize(job.id, job.order_id, outcome.clone()).await {
        Ok(_) => return,
        Err(e) if attempt < RECORD_ATTEMPTS => {
          warn!(job_id = %job.id, order_id = %job.order_id, attempt, error = %e, "Recording polled outcome failed; retrying.");
          tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
          }
        }
        Err(e) => {
          error!(job_id = %job.id, order_id = %job.order_id, error = %e, "Recording polled outcome failed.");
        }
      }
    }
  }

  /// Re-spawns waiters for polling-mode jobs left generating, e.g. by a
  /// previous process. Each resumed wait gets a fresh budget.
  #[instrument(name = "OrderAggregator::resume_polling", skip(self), err(Display))]
  pub async fn resume_polling(self: &Arc<Self>) -> ForgeResult<usize> {
    let pending = self.jobs.pending_polling_jobs().await?;
    let count = pending.len();
    for job in pending {
      self.spawn_waiter(job);
    }
    info!(count, "Resumed polling for generating jobs.");
    Ok(count)
  }

  /// Re-queues orders claimed for dispatch whose notification never went
  /// out, e.g. because the process stopped between claim and send.
  #[instrument(name = "OrderAggregator::resume_notifications", skip(self), err(Display))]
  pub async fn resume_notifications(&self) -> ForgeResult<usize> {
    let stalled = self.orders.dispatching_orders().await?;
    let count = stalled.len();
    for order_id in stalled {
      self.notifications.enqueue(order_id)?;
    }
    info!(count, "Re-queued notifications left dispatching.");
    Ok(count)
  }

  pub async fn job_status(&self, job_id: Uuid) -> ForgeResult<GenerationJob> {
    self.jobs.get_job(job_id).await
  }

  pub async fn order_view(&self, order_id: Uuid) -> ForgeResult<(Order, Vec<GenerationJob>)> {
    let order = self.orders.get_order(order_id).await?;
    let jobs = self.jobs.jobs_for_order(order_id).await?;
    Ok((order, jobs))
  }
}
