// songforge/src/orchestrator.rs

//! Wires the aggregator, ingest and notifier around one set of collaborators.

use crate::aggregator::{FanOutReport, OrderAggregator};
use crate::error::ForgeResult;
use crate::ingest::{IngestOutcome, ProviderCallback, WebhookIngest};
use crate::models::{GenerationJob, Order};
use crate::notifier::{notification_channel, DeliveryReceipt, NotificationTransport, Notifier};
use crate::provider::GenerationProvider;
use crate::settings::OrchestratorSettings;
use crate::store::{JobStore, OrderStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use uuid::Uuid;

pub struct Orchestrator {
  aggregator: Arc<OrderAggregator>,
  ingest: WebhookIngest,
  notifier: Arc<Notifier>,
  cancel: CancellationToken,
  tracker: TaskTracker,
}

impl Orchestrator {
  /// Builds the orchestrator and starts its notification worker.
  /// Must be called inside a tokio runtime.
  pub fn start(
    provider: Arc<dyn GenerationProvider>,
    jobs: Arc<dyn JobStore>,
    orders: Arc<dyn OrderStore>,
    transport: Arc<dyn NotificationTransport>,
    settings: OrchestratorSettings,
  ) -> Self {
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let (queue, receiver) = notification_channel();

    let notifier = Arc::new(Notifier::new(transport, orders.clone(), jobs.clone()));
    notifier.clone().spawn_worker(receiver, cancel.clone(), &tracker);

    info!(
      poll_interval_secs = settings.poll_interval.as_secs_f64(),
      wait_budget_secs = settings.wait_budget.as_secs_f64(),
      callbacks = settings.callback_url.is_some(),
      "Orchestrator started."
    );

    let aggregator = OrderAggregator::new(provider, jobs, orders, queue, settings, cancel.clone(), tracker.clone());
    let ingest = WebhookIngest::new(aggregator.clone());

    Self {
      aggregator,
      ingest,
      notifier,
      cancel,
      tracker,
    }
  }

  pub async fn fulfill(&self, order_id: Uuid) -> ForgeResult<FanOutReport> {
    self.aggregator.fan_out(order_id).await
  }

  pub async fn ingest(&self, callback: ProviderCallback) -> ForgeResult<IngestOutcome> {
    self.ingest.ingest(callback).await
  }

  pub async fn resume_polling(&self) -> ForgeResult<usize> {
    self.aggregator.resume_polling().await
  }

  pub async fn resume_notifications(&self) -> ForgeResult<usize> {
    self.aggregator.resume_notifications().await
  }

  pub async fn job_status(&self, job_id: Uuid) -> ForgeResult<GenerationJob> {
    self.aggregator.job_status(job_id).await
  }

  pub async fn order_view(&self, order_id: Uuid) -> ForgeResult<(Order, Vec<GenerationJob>)> {
    self.aggregator.order_view(order_id).await
  }

  pub async fn retry_notification(&self, order_id: Uuid) -> ForgeResult<Option<DeliveryReceipt>> {
    self.notifier.retry(order_id).await
  }

  pub async fn retry_failed_notifications(&self) -> ForgeResult<usize> {
    self.notifier.retry_all_failed().await
  }

  pub fn aggregator(&self) -> &Arc<OrderAggregator> {
    &self.aggregator
  }

  /// Stops every waiter, flushes queued notifications and waits for all
  /// background tasks. Jobs still generating stay that way for a later resume.
  pub async fn shutdown(&self) {
    self.cancel.cancel();
    self.tracker.close();
    self.tracker.wait().await;
    info!("Orchestrator stopped.");
  }
}
