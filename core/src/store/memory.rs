// songforge/src/store/memory.rs

//! In-process store. Used by tests, local development and the demo example.

use crate::error::{ForgeError, ForgeResult};
use crate::models::{GenerationJob, JobOutcome, JobStatus, NotificationStatus, Order, OrderItem, OrderStatus, SubmissionMode};
use crate::store::{JobStore, OrderStore};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
  orders: HashMap<Uuid, Order>,
  items: HashMap<Uuid, Vec<OrderItem>>,
  jobs: HashMap<Uuid, GenerationJob>,
  /// provider task id -> job id
  task_index: HashMap<String, Uuid>,
}

/// All tables sit behind one mutex, so every check-and-set below is atomic
/// with respect to every other store call.
#[derive(Default)]
pub struct MemoryStore {
  tables: Mutex<Tables>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seeds an order and its items.
  pub fn insert_order(&self, order: Order, items: Vec<OrderItem>) {
    let mut tables = self.tables.lock();
    tables.items.insert(order.id, items);
    tables.orders.insert(order.id, order);
  }
}

#[async_trait]
impl JobStore for MemoryStore {
  async fn create_job(&self, order_id: Uuid, order_item_id: Uuid) -> ForgeResult<GenerationJob> {
    let mut tables = self.tables.lock();
    if let Some(existing) = tables.jobs.values().find(|j| j.order_item_id == order_item_id) {
      return Ok(existing.clone());
    }
    let job = GenerationJob::new(order_id, order_item_id);
    tables.jobs.insert(job.id, job.clone());
    Ok(job)
  }

  async fn record_submission(&self, job_id: Uuid, task_ids: &[String], mode: SubmissionMode) -> ForgeResult<bool> {
    let mut tables = self.tables.lock();
    let job = tables
      .jobs
      .get_mut(&job_id)
      .ok_or_else(|| ForgeError::not_found("job", job_id))?;
    if job.is_terminal() || job.mode.is_some() {
      return Ok(false);
    }
    job.task_ids = task_ids.to_vec();
    job.mode = Some(mode);
    job.updated_at = Utc::now();
    for task_id in task_ids {
      tables.task_index.insert(task_id.clone(), job_id);
    }
    Ok(true)
  }

  #[instrument(skip(self, outcome), fields(status = outcome.status().as_str()))]
  async fn try_terminalize(&self, job_id: Uuid, outcome: JobOutcome) -> ForgeResult<bool> {
    let mut tables = self.tables.lock();
    let job = tables
      .jobs
      .get_mut(&job_id)
      .ok_or_else(|| ForgeError::not_found("job", job_id))?;
    if job.is_terminal() {
      debug!("Job already terminal; update ignored.");
      return Ok(false);
    }
    job.apply_outcome(outcome);
    Ok(true)
  }

  async fn get_job(&self, job_id: Uuid) -> ForgeResult<GenerationJob> {
    self
      .tables
      .lock()
      .jobs
      .get(&job_id)
      .cloned()
      .ok_or_else(|| ForgeError::not_found("job", job_id))
  }

  async fn find_by_task_id(&self, task_id: &str) -> ForgeResult<Option<GenerationJob>> {
    let tables = self.tables.lock();
    Ok(
      tables
        .task_index
        .get(task_id)
        .and_then(|job_id| tables.jobs.get(job_id))
        .cloned(),
    )
  }

  async fn jobs_for_order(&self, order_id: Uuid) -> ForgeResult<Vec<GenerationJob>> {
    let tables = self.tables.lock();
    let mut jobs: Vec<GenerationJob> = tables.jobs.values().filter(|j| j.order_id == order_id).cloned().collect();
    jobs.sort_by_key(|j| j.created_at);
    Ok(jobs)
  }

  async fn pending_polling_jobs(&self) -> ForgeResult<Vec<GenerationJob>> {
    let tables = self.tables.lock();
    Ok(
      tables
        .jobs
        .values()
        .filter(|j| j.status == JobStatus::Generating && j.mode == Some(SubmissionMode::Polling))
        .cloned()
        .collect(),
    )
  }
}

#[async_trait]
impl OrderStore for MemoryStore {
  async fn get_order(&self, order_id: Uuid) -> ForgeResult<Order> {
    self
      .tables
      .lock()
      .orders
      .get(&order_id)
      .cloned()
      .ok_or_else(|| ForgeError::not_found("order", order_id))
  }

  async fn order_items(&self, order_id: Uuid) -> ForgeResult<Vec<OrderItem>> {
    let tables = self.tables.lock();
    if !tables.orders.contains_key(&order_id) {
      return Err(ForgeError::not_found("order", order_id));
    }
    Ok(tables.items.get(&order_id).cloned().unwrap_or_default())
  }

  async fn begin_fan_out(&self, order_id: Uuid) -> ForgeResult<bool> {
    let mut tables = self.tables.lock();
    let order = tables
      .orders
      .get_mut(&order_id)
      .ok_or_else(|| ForgeError::not_found("order", order_id))?;
    if order.fan_out_started {
      return Ok(false);
    }
    order.fan_out_started = true;
    order.updated_at = Utc::now();
    Ok(true)
  }

  async fn claim_settlement(&self, order_id: Uuid, status: OrderStatus) -> ForgeResult<bool> {
    let mut tables = self.tables.lock();
    let order = tables
      .orders
      .get_mut(&order_id)
      .ok_or_else(|| ForgeError::not_found("order", order_id))?;
    if order.notification_status != NotificationStatus::Pending {
      return Ok(false);
    }
    order.notification_status = NotificationStatus::Dispatching;
    order.status = status;
    order.updated_at = Utc::now();
    Ok(true)
  }

  async fn claim_notification_retry(&self, order_id: Uuid) -> ForgeResult<bool> {
    let mut tables = self.tables.lock();
    let order = tables
      .orders
      .get_mut(&order_id)
      .ok_or_else(|| ForgeError::not_found("order", order_id))?;
    if order.notification_status != NotificationStatus::Failed {
      return Ok(false);
    }
    order.notification_status = NotificationStatus::Dispatching;
    order.updated_at = Utc::now();
    Ok(true)
  }

  async fn record_notification(
    &self,
    order_id: Uuid,
    status: NotificationStatus,
    message_id: Option<&str>,
    error: Option<&str>,
  ) -> ForgeResult<()> {
    let mut tables = self.tables.lock();
    let order = tables
      .orders
      .get_mut(&order_id)
      .ok_or_else(|| ForgeError::not_found("order", order_id))?;
    order.notification_status = status;
    order.notification_message_id = message_id.map(str::to_string);
    order.notification_error = error.map(str::to_string);
    order.updated_at = Utc::now();
    Ok(())
  }

  async fn unnotified_orders(&self) -> ForgeResult<Vec<Uuid>> {
    let tables = self.tables.lock();
    Ok(
      tables
        .orders
        .values()
        .filter(|o| o.notification_status == NotificationStatus::Failed)
        .map(|o| o.id)
        .collect(),
    )
  }

  async fn dispatching_orders(&self) -> ForgeResult<Vec<Uuid>> {
    let tables = self.tables.lock();
    Ok(
      tables
        .orders
        .values()
        .filter(|o| o.notification_status == NotificationStatus::Dispatching)
        .map(|o| o.id)
        .collect(),
    )
  }
}
