// songforge/src/notifier.rs

//! Composes and delivers the one customer message of a settled order.
//!
//! The settlement claim in the order store is what makes delivery
//! exactly-once. The notifier only sends for orders already claimed
//! (`dispatching`) and records how the delivery went.

use crate::error::{ForgeError, ForgeResult};
use crate::models::{GenerationJob, JobStatus, NotificationStatus, Order, OrderItem};
use crate::store::{JobStore, OrderStore};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedTrack {
  pub job_id: Uuid,
  pub order_item_id: Uuid,
  pub label: String,
  pub audio_url: String,
  pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
  /// At least one track is ready. Carries only the completed ones.
  Ready { tracks: Vec<CompletedTrack>, failed_count: usize },
  GenerationFailed { failed_count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerNotification {
  pub recipient: String,
  pub order_id: Uuid,
  pub kind: NotificationKind,
  /// Majority language of the order's items, for the transport's content choice.
  pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
  pub message_id: String,
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
  async fn send(&self, notification: &CustomerNotification) -> ForgeResult<DeliveryReceipt>;
}

/// Builds the message for a settled order from its terminal jobs.
pub fn compose(order: &Order, items: &[OrderItem], jobs: &[GenerationJob]) -> CustomerNotification {
  let labels: HashMap<Uuid, &str> = items.iter().map(|i| (i.id, i.label.as_str())).collect();

  let tracks: Vec<CompletedTrack> = jobs
    .iter()
    .filter(|job| job.status == JobStatus::Completed)
    .filter_map(|job| {
      job.artifact.as_ref().map(|artifact| CompletedTrack {
        job_id: job.id,
        order_item_id: job.order_item_id,
        label: labels.get(&job.order_item_id).copied().unwrap_or_default().to_string(),
        audio_url: artifact.audio_url.clone(),
        image_url: artifact.image_url.clone(),
      })
    })
    .collect();
  let failed_count = jobs.len() - tracks.len();

  let kind = if tracks.is_empty() {
    NotificationKind::GenerationFailed { failed_count }
  } else {
    NotificationKind::Ready { tracks, failed_count }
  };

  CustomerNotification {
    recipient: order.customer_email.clone(),
    order_id: order.id,
    kind,
    language: dominant_language(items),
  }
}

/// Most frequent item language hint; ties go to the alphabetically first code.
pub fn dominant_language(items: &[OrderItem]) -> Option<String> {
  let mut votes: HashMap<&str, usize> = HashMap::new();
  for language in items.iter().filter_map(|i| i.language.as_deref()) {
    *votes.entry(language).or_default() += 1;
  }
  votes
    .into_iter()
    .max_by(|(lang_a, count_a), (lang_b, count_b)| count_a.cmp(count_b).then_with(|| lang_b.cmp(lang_a)))
    .map(|(language, _)| language.to_string())
}

/// Sending half of the dispatch channel. Enqueueing never blocks, so webhook
/// handlers can hand off an order and return immediately.
#[derive(Clone)]
pub struct NotificationQueue {
  tx: mpsc::UnboundedSender<Uuid>,
}

pub struct NotificationReceiver {
  rx: mpsc::UnboundedReceiver<Uuid>,
}

pub fn notification_channel() -> (NotificationQueue, NotificationReceiver) {
  let (tx, rx) = mpsc::unbounded_channel();
  (NotificationQueue { tx }, NotificationReceiver { rx })
}

impl NotificationQueue {
  pub fn enqueue(&self, order_id: Uuid) -> ForgeResult<()> {
    self
      .tx
      .send(order_id)
      .map_err(|_| ForgeError::Internal(format!("notification worker is gone; order {} not queued", order_id)))
  }
}

pub struct Notifier {
  transport: Arc<dyn NotificationTransport>,
  orders: Arc<dyn OrderStore>,
  jobs: Arc<dyn JobStore>,
}

impl Notifier {
  pub fn new(transport: Arc<dyn NotificationTransport>, orders: Arc<dyn OrderStore>, jobs: Arc<dyn JobStore>) -> Self {
    Self {
      transport,
      orders,
      jobs,
    }
  }

  /// Sends the message for an order already claimed for dispatch and records
  /// the result. A transport failure leaves the order settled but unnotified.
  #[instrument(name = "Notifier::dispatch", skip(self), err(Display))]
  pub async fn dispatch(&self, order_id: Uuid) -> ForgeResult<DeliveryReceipt> {
    let order = self.orders.get_order(order_id).await?;
    let items = self.orders.order_items(order_id).await?;
    let jobs = self.jobs.jobs_for_order(order_id).await?;
    let notification = compose(&order, &items, &jobs);

    match self.transport.send(&notification).await {
      Ok(receipt) => {
        self
          .orders
          .record_notification(order_id, NotificationStatus::Sent, Some(&receipt.message_id), None)
          .await?;
        info!(message_id = %receipt.message_id, "Customer notified.");
        Ok(receipt)
      }
      Err(e) => {
        let detail = e.to_string();
        self
          .orders
          .record_notification(order_id, NotificationStatus::Failed, None, Some(&detail))
          .await?;
        warn!(error = %detail, "Notification delivery failed; order stays settled and can be retried.");
        Err(ForgeError::Transport { message: detail })
      }
    }
  }

  /// Re-sends an order whose last delivery failed. `Ok(None)` when the order
  /// is not in the failed state (already sent, or being dispatched).
  #[instrument(name = "Notifier::retry", skip(self))]
  pub async fn retry(&self, order_id: Uuid) -> ForgeResult<Option<DeliveryReceipt>> {
    if !self.orders.claim_notification_retry(order_id).await? {
      info!("Order is not awaiting a notification retry.");
      return Ok(None);
    }
    self.dispatch(order_id).await.map(Some)
  }

  /// Retries every order whose delivery failed. Returns how many were sent.
  pub async fn retry_all_failed(&self) -> ForgeResult<usize> {
    let mut sent = 0;
    for order_id in self.orders.unnotified_orders().await? {
      match self.retry(order_id).await {
        Ok(Some(_)) => sent += 1,
        Ok(None) => {}
        Err(e) => warn!(%order_id, error = %e, "Notification retry failed."),
      }
    }
    Ok(sent)
  }

  /// Consumes the dispatch channel until cancelled. Orders already queued at
  /// cancellation are still dispatched so none is left claimed but unsent.
  pub fn spawn_worker(self: Arc<Self>, receiver: NotificationReceiver, cancel: CancellationToken, tracker: &TaskTracker) {
    let NotificationReceiver { mut rx } = receiver;
    tracker.spawn(async move {
      loop {
        tokio::select! {
          biased;
          received = rx.recv() => match received {
            Some(order_id) => self.dispatch_logged(order_id).await,
            None => break,
          },
          _ = cancel.cancelled() => {
            while let Ok(order_id) = rx.try_recv() {
              self.dispatch_logged(order_id).await;
            }
            break;
          }
        }
      }
      info!("Notification worker stopped.");
    });
  }

  async fn dispatch_logged(&self, order_id: Uuid) {
    if let Err(e) = self.dispatch(order_id).await {
      error!(%order_id, error = %e, "Dispatch failed.");
    }
  }
}
