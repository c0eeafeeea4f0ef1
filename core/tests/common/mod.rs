// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use songforge::{
  CustomerNotification, DeliveryReceipt, ForgeError, ForgeResult, GenerationJob, GenerationProvider, JobOutcome,
  JobStore, MemoryStore, NotificationStatus, NotificationTransport, Orchestrator, OrchestratorSettings, Order,
  OrderItem, OrderStatus, OrderStore, Submission, SubmissionMode, TaskState, TaskStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

// --- Tracing ---
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Scripted provider ---

/// One poll answer for a task. The last answer of a script repeats forever.
#[derive(Clone, Debug)]
pub enum Poll {
  Pending,
  Running,
  Succeeded { audio: Option<&'static str> },
  Failed(&'static str),
  /// The status call itself errors (network trouble).
  Unreachable,
}

/// How the provider treats one order item, keyed by the item's label.
#[derive(Clone, Debug)]
pub struct ItemScript {
  pub reject: Option<&'static str>,
  pub accept_callback: bool,
  pub variants: usize,
  pub polls: Vec<Poll>,
}

impl Default for ItemScript {
  fn default() -> Self {
    Self {
      reject: None,
      accept_callback: true,
      variants: 1,
      polls: vec![Poll::Pending],
    }
  }
}

impl ItemScript {
  pub fn webhook() -> Self {
    Self::default()
  }

  pub fn polling(polls: Vec<Poll>) -> Self {
    Self {
      accept_callback: false,
      polls,
      ..Self::default()
    }
  }

  pub fn rejected(reason: &'static str) -> Self {
    Self {
      reject: Some(reason),
      ..Self::default()
    }
  }

  pub fn with_variants(mut self, variants: usize) -> Self {
    self.variants = variants;
    self
  }
}

/// Task ids are `"{label}-{n}"`, so tests can address callbacks by label.
pub fn task_id(label: &str, variant: usize) -> String {
  format!("{}-{}", label, variant)
}

#[derive(Default)]
pub struct ScriptedProvider {
  scripts: Mutex<HashMap<String, ItemScript>>,
  /// task id -> (script, polls answered so far)
  tasks: Mutex<HashMap<String, (ItemScript, usize)>>,
  pub submit_calls: AtomicUsize,
  pub status_calls: AtomicUsize,
}

impl ScriptedProvider {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn script(self: &Arc<Self>, label: &str, script: ItemScript) -> Arc<Self> {
    self.scripts.lock().insert(label.to_string(), script);
    Arc::clone(self)
  }

  pub fn submits(&self) -> usize {
    self.submit_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
  async fn submit(&self, item: &OrderItem, callback_url: Option<&str>) -> ForgeResult<Submission> {
    self.submit_calls.fetch_add(1, Ordering::SeqCst);
    let script = self.scripts.lock().get(&item.label).cloned().unwrap_or_default();
    if let Some(reason) = script.reject {
      return Err(ForgeError::provider(reason));
    }

    let task_ids: Vec<String> = (0..script.variants).map(|n| task_id(&item.label, n)).collect();
    let mut tasks = self.tasks.lock();
    for id in &task_ids {
      tasks.insert(id.clone(), (script.clone(), 0));
    }
    Ok(Submission::from_response(
      task_ids,
      script.accept_callback && callback_url.is_some(),
    ))
  }

  async fn status(&self, task_id: &str) -> ForgeResult<TaskStatus> {
    self.status_calls.fetch_add(1, Ordering::SeqCst);
    let poll = {
      let mut tasks = self.tasks.lock();
      let (script, answered) = tasks
        .get_mut(task_id)
        .ok_or_else(|| ForgeError::provider(format!("unknown task {}", task_id)))?;
      let idx = (*answered).min(script.polls.len().saturating_sub(1));
      *answered += 1;
      script.polls.get(idx).cloned().unwrap_or(Poll::Pending)
    };

    let (state, audio) = match poll {
      Poll::Pending => (TaskState::Pending, None),
      Poll::Running => (TaskState::Running, None),
      Poll::Succeeded { audio } => (TaskState::Succeeded, audio),
      Poll::Failed(detail) => (TaskState::Failed(detail.to_string()), None),
      Poll::Unreachable => return Err(ForgeError::provider("status endpoint unreachable")),
    };
    Ok(TaskStatus {
      task_id: task_id.to_string(),
      state,
      audio_url: audio.map(str::to_string),
      image_url: None,
    })
  }
}

// --- Recording transport ---

#[derive(Default)]
pub struct RecordingTransport {
  sent: Mutex<Vec<CustomerNotification>>,
  failures_left: AtomicUsize,
  pub attempts: AtomicUsize,
}

impl RecordingTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// The next `n` sends fail.
  pub fn failing(n: usize) -> Arc<Self> {
    let transport = Self::default();
    transport.failures_left.store(n, Ordering::SeqCst);
    Arc::new(transport)
  }

  pub fn sent(&self) -> Vec<CustomerNotification> {
    self.sent.lock().clone()
  }

  pub fn sent_for(&self, order_id: Uuid) -> Vec<CustomerNotification> {
    self.sent.lock().iter().filter(|n| n.order_id == order_id).cloned().collect()
  }

  /// Waits until at least `n` send attempts were made, or the deadline passes.
  pub async fn wait_for_attempts(&self, n: usize, deadline: Duration) -> bool {
    wait_until(deadline, || self.attempts.load(Ordering::SeqCst) >= n).await
  }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
  async fn send(&self, notification: &CustomerNotification) -> ForgeResult<DeliveryReceipt> {
    self.attempts.fetch_add(1, Ordering::SeqCst);
    let fail = self
      .failures_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
      .is_ok();
    if fail {
      return Err(ForgeError::Transport {
        message: "mail relay refused the message".to_string(),
      });
    }
    self.sent.lock().push(notification.clone());
    Ok(DeliveryReceipt {
      message_id: format!("msg-{}", Uuid::new_v4()),
    })
  }
}

// --- Store with injected faults ---

/// Delegates to a `MemoryStore` and fails selected calls on demand.
pub struct FlakyStore {
  pub inner: Arc<MemoryStore>,
  order_items_failures: AtomicUsize,
  /// `record_submission` errors for tasks of this item label.
  unrecordable_label: Mutex<Option<String>>,
  /// `record_submission` reports "not applied" for tasks of this item label.
  ignored_label: Mutex<Option<String>>,
}

impl FlakyStore {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      inner: Arc::new(MemoryStore::new()),
      order_items_failures: AtomicUsize::new(0),
      unrecordable_label: Mutex::new(None),
      ignored_label: Mutex::new(None),
    })
  }

  /// The next `n` `order_items` reads fail.
  pub fn fail_order_items(&self, n: usize) {
    self.order_items_failures.store(n, Ordering::SeqCst);
  }

  pub fn fail_recording_for(&self, label: &str) {
    *self.unrecordable_label.lock() = Some(label.to_string());
  }

  pub fn ignore_recording_for(&self, label: &str) {
    *self.ignored_label.lock() = Some(label.to_string());
  }

  pub fn order_items_failures_left(&self) -> usize {
    self.order_items_failures.load(Ordering::SeqCst)
  }

  pub fn heal(&self) {
    self.order_items_failures.store(0, Ordering::SeqCst);
    *self.unrecordable_label.lock() = None;
    *self.ignored_label.lock() = None;
  }

  fn targets(label: &Mutex<Option<String>>, task_ids: &[String]) -> bool {
    match label.lock().as_deref() {
      Some(label) => task_ids.iter().any(|id| id.starts_with(&format!("{}-", label))),
      None => false,
    }
  }
}

fn outage(operation: &'static str) -> ForgeError {
  ForgeError::store(operation, anyhow::anyhow!("connection reset by peer"))
}

#[async_trait]
impl JobStore for FlakyStore {
  async fn create_job(&self, order_id: Uuid, order_item_id: Uuid) -> ForgeResult<GenerationJob> {
    self.inner.create_job(order_id, order_item_id).await
  }

  async fn record_submission(&self, job_id: Uuid, task_ids: &[String], mode: SubmissionMode) -> ForgeResult<bool> {
    if Self::targets(&self.unrecordable_label, task_ids) {
      return Err(outage("record_submission"));
    }
    if Self::targets(&self.ignored_label, task_ids) {
      return Ok(false);
    }
    self.inner.record_submission(job_id, task_ids, mode).await
  }

  async fn try_terminalize(&self, job_id: Uuid, outcome: JobOutcome) -> ForgeResult<bool> {
    self.inner.try_terminalize(job_id, outcome).await
  }

  async fn get_job(&self, job_id: Uuid) -> ForgeResult<GenerationJob> {
    self.inner.get_job(job_id).await
  }

  async fn find_by_task_id(&self, task_id: &str) -> ForgeResult<Option<GenerationJob>> {
    self.inner.find_by_task_id(task_id).await
  }

  async fn jobs_for_order(&self, order_id: Uuid) -> ForgeResult<Vec<GenerationJob>> {
    self.inner.jobs_for_order(order_id).await
  }

  async fn pending_polling_jobs(&self) -> ForgeResult<Vec<GenerationJob>> {
    self.inner.pending_polling_jobs().await
  }
}

#[async_trait]
impl OrderStore for FlakyStore {
  async fn get_order(&self, order_id: Uuid) -> ForgeResult<Order> {
    self.inner.get_order(order_id).await
  }

  async fn order_items(&self, order_id: Uuid) -> ForgeResult<Vec<OrderItem>> {
    let fail = self
      .order_items_failures
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
      .is_ok();
    if fail {
      return Err(outage("order_items"));
    }
    self.inner.order_items(order_id).await
  }

  async fn begin_fan_out(&self, order_id: Uuid) -> ForgeResult<bool> {
    self.inner.begin_fan_out(order_id).await
  }

  async fn claim_settlement(&self, order_id: Uuid, status: OrderStatus) -> ForgeResult<bool> {
    self.inner.claim_settlement(order_id, status).await
  }

  async fn claim_notification_retry(&self, order_id: Uuid) -> ForgeResult<bool> {
    self.inner.claim_notification_retry(order_id).await
  }

  async fn record_notification(
    &self,
    order_id: Uuid,
    status: NotificationStatus,
    message_id: Option<&str>,
    error: Option<&str>,
  ) -> ForgeResult<()> {
    self.inner.record_notification(order_id, status, message_id, error).await
  }

  async fn unnotified_orders(&self) -> ForgeResult<Vec<Uuid>> {
    self.inner.unnotified_orders().await
  }

  async fn dispatching_orders(&self) -> ForgeResult<Vec<Uuid>> {
    self.inner.dispatching_orders().await
  }
}

// --- Fixtures ---

pub fn seed_order(store: &MemoryStore, labels: &[&str]) -> (Order, Vec<OrderItem>) {
  let order = Order::new_paid(Uuid::new_v4(), "listener@example.com", "pay_test_123", 2_900 * labels.len() as i64);
  let items: Vec<OrderItem> = labels
    .iter()
    .map(|label| OrderItem::new(order.id, label, "la la la", &["pop", "upbeat"]))
    .collect();
  store.insert_order(order.clone(), items.clone());
  (order, items)
}

pub fn webhook_settings() -> OrchestratorSettings {
  OrchestratorSettings::default()
    .with_callback_url("http://localhost:8080/api/v1/webhooks/provider-callback")
    .with_polling(Duration::from_millis(10), Duration::from_millis(300))
}

pub fn polling_settings(budget: Duration) -> OrchestratorSettings {
  OrchestratorSettings::default().with_polling(Duration::from_millis(10), budget)
}

pub struct Harness {
  pub store: Arc<MemoryStore>,
  pub provider: Arc<ScriptedProvider>,
  pub transport: Arc<RecordingTransport>,
  pub orchestrator: Orchestrator,
}

pub fn harness(provider: Arc<ScriptedProvider>, transport: Arc<RecordingTransport>, settings: OrchestratorSettings) -> Harness {
  let store = Arc::new(MemoryStore::new());
  let orchestrator = Orchestrator::start(provider.clone(), store.clone(), store.clone(), transport.clone(), settings);
  Harness {
    store,
    provider,
    transport,
    orchestrator,
  }
}

/// Like `harness`, but the orchestrator goes through a `FlakyStore`.
/// `Harness::store` is the healthy store underneath, for seeding and checks.
pub fn flaky_harness(
  provider: Arc<ScriptedProvider>,
  transport: Arc<RecordingTransport>,
  settings: OrchestratorSettings,
) -> (Harness, Arc<FlakyStore>) {
  let flaky = FlakyStore::new();
  let orchestrator = Orchestrator::start(provider.clone(), flaky.clone(), flaky.clone(), transport.clone(), settings);
  let harness = Harness {
    store: flaky.inner.clone(),
    provider,
    transport,
    orchestrator,
  };
  (harness, flaky)
}

pub async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let start = tokio::time::Instant::now();
  loop {
    if condition() {
      return true;
    }
    if start.elapsed() >= deadline {
      return false;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

/// Polls the store until the order's notification reaches `status`.
pub async fn wait_for_notification(store: &MemoryStore, order_id: Uuid, status: NotificationStatus) -> Order {
  let start = tokio::time::Instant::now();
  loop {
    let order = store.get_order(order_id).await.expect("order exists");
    if order.notification_status == status || start.elapsed() >= Duration::from_secs(3) {
      return order;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

/// Polls the store until the job is terminal (3s cap) and returns it.
pub async fn wait_for_terminal_job(store: &MemoryStore, job_id: Uuid) -> GenerationJob {
  let start = tokio::time::Instant::now();
  loop {
    let job = store.get_job(job_id).await.expect("job exists");
    if job.is_terminal() || start.elapsed() >= Duration::from_secs(3) {
      return job;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}
