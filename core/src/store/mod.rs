// songforge/src/store/mod.rs

//! State-transition contract for jobs and orders.
//!
//! Backends own raw persistence. Every mutation the orchestrator needs is a
//! conditional update keyed on the prior state, so concurrent callers racing
//! on the same record get exactly one `true`.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::ForgeResult;
use crate::models::{GenerationJob, JobOutcome, NotificationStatus, Order, OrderItem, OrderStatus, SubmissionMode};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
  /// Inserts a `generating` job for one order item, or returns the job the
  /// item already has. An item never gets a second job.
  async fn create_job(&self, order_id: Uuid, order_item_id: Uuid) -> ForgeResult<GenerationJob>;

  /// Records task ids and mode. Applies only while the job is generating and
  /// has no mode yet; returns whether it applied.
  async fn record_submission(&self, job_id: Uuid, task_ids: &[String], mode: SubmissionMode) -> ForgeResult<bool>;

  /// `generating -> completed|failed`, atomically. Returns `false` when the
  /// job was already terminal and nothing changed.
  async fn try_terminalize(&self, job_id: Uuid, outcome: JobOutcome) -> ForgeResult<bool>;

  async fn get_job(&self, job_id: Uuid) -> ForgeResult<GenerationJob>;

  async fn find_by_task_id(&self, task_id: &str) -> ForgeResult<Option<GenerationJob>>;

  async fn jobs_for_order(&self, order_id: Uuid) -> ForgeResult<Vec<GenerationJob>>;

  /// Polling-mode jobs still generating, across all orders.
  async fn pending_polling_jobs(&self) -> ForgeResult<Vec<GenerationJob>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
  async fn get_order(&self, order_id: Uuid) -> ForgeResult<Order>;

  async fn order_items(&self, order_id: Uuid) -> ForgeResult<Vec<OrderItem>>;

  /// Flips the fan-out flag from unset to set. `false` means another trigger
  /// already started fan-out for this order.
  async fn begin_fan_out(&self, order_id: Uuid) -> ForgeResult<bool>;

  /// Notification `pending -> dispatching` together with the settled status.
  /// Exactly one caller per order ever receives `true`.
  async fn claim_settlement(&self, order_id: Uuid, status: OrderStatus) -> ForgeResult<bool>;

  /// Notification `failed -> dispatching` for an out-of-band retry.
  async fn claim_notification_retry(&self, order_id: Uuid) -> ForgeResult<bool>;

  /// Records the delivery result of a dispatch (`sent` or `failed`).
  async fn record_notification(
    &self,
    order_id: Uuid,
    status: NotificationStatus,
    message_id: Option<&str>,
    error: Option<&str>,
  ) -> ForgeResult<()>;

  /// Settled orders whose notification delivery failed.
  async fn unnotified_orders(&self) -> ForgeResult<Vec<Uuid>>;

  /// Orders claimed for dispatch whose delivery result was never recorded.
  async fn dispatching_orders(&self) -> ForgeResult<Vec<Uuid>>;
}
