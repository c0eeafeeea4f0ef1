// songforge/examples/fulfill_in_memory.rs

//! Fulfills one three-song order against an in-memory store: two songs come
//! back through provider callbacks, the third is polled until it finishes.

use async_trait::async_trait;
use parking_lot::Mutex;
use songforge::{
  CustomerNotification, DeliveryReceipt, ForgeError, ForgeResult, GenerationProvider, MemoryStore,
  NotificationTransport, Orchestrator, OrchestratorSettings, Order, OrderItem, OrderStore, ProviderCallback,
  Submission, TaskState, TaskStatus,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Accepts callbacks for every item except those tagged "acoustic", which it
/// reports as finished on the third status poll.
#[derive(Default)]
struct DemoProvider {
  polls: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl GenerationProvider for DemoProvider {
  async fn submit(&self, item: &OrderItem, callback_url: Option<&str>) -> ForgeResult<Submission> {
    let task_id = format!("task-{}", item.id.simple());
    let accepts_callback = !item.style_tags.iter().any(|t| t == "acoustic");
    info!(label = %item.label, %task_id, accepts_callback, "Provider accepted submission.");
    Ok(Submission::from_response(vec![task_id], accepts_callback && callback_url.is_some()))
  }

  async fn status(&self, task_id: &str) -> ForgeResult<TaskStatus> {
    let mut polls = self.polls.lock();
    let count = polls.entry(task_id.to_string()).or_default();
    *count += 1;
    let done = *count >= 3;
    Ok(TaskStatus {
      task_id: task_id.to_string(),
      state: if done { TaskState::Succeeded } else { TaskState::Running },
      audio_url: done.then(|| format!("https://cdn.example.com/{}.mp3", task_id)),
      image_url: None,
    })
  }
}

struct PrintTransport;

#[async_trait]
impl NotificationTransport for PrintTransport {
  async fn send(&self, notification: &CustomerNotification) -> ForgeResult<DeliveryReceipt> {
    let body = serde_json::to_string_pretty(notification).map_err(|e| ForgeError::Transport {
      message: e.to_string(),
    })?;
    info!(to = %notification.recipient, "Sending customer notification:\n{}", body);
    Ok(DeliveryReceipt {
      message_id: format!("demo-{}", Uuid::new_v4()),
    })
  }
}

#[tokio::main]
async fn main() -> Result<(), ForgeError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let store = Arc::new(MemoryStore::new());
  let order = Order::new_paid(Uuid::new_v4(), "listener@example.com", "pay_demo_001", 8_700);
  let items = vec![
    OrderItem::new(order.id, "Wedding Waltz", "Two hearts in three-four time", &["waltz", "strings"]),
    OrderItem::new(order.id, "Road Trip", "Windows down and the radio loud", &["rock"]),
    OrderItem::new(order.id, "Porch Song", "Evening light on the old wood boards", &["acoustic", "folk"]),
  ];
  store.insert_order(order.clone(), items.clone());

  let settings = OrchestratorSettings::default()
    .with_callback_url("http://localhost:8080/api/v1/webhooks/provider-callback")
    .with_polling(Duration::from_millis(100), Duration::from_secs(5));
  let orchestrator = Orchestrator::start(
    Arc::new(DemoProvider::default()),
    store.clone(),
    store.clone(),
    Arc::new(PrintTransport),
    settings,
  );

  let report = orchestrator.fulfill(order.id).await?;
  info!(
    jobs = report.jobs.len(),
    webhook = report.count_mode(songforge::SubmissionMode::Webhook),
    polling = report.count_mode(songforge::SubmissionMode::Polling),
    "Order fanned out."
  );

  // Play the provider's part for the webhook-mode jobs.
  for dispatch in report.jobs.iter().filter(|j| j.mode == Some(songforge::SubmissionMode::Webhook)) {
    for task_id in &dispatch.task_ids {
      let outcome = orchestrator
        .ingest(ProviderCallback {
          task_id: task_id.clone(),
          state: TaskState::Succeeded,
          audio_url: Some(format!("https://cdn.example.com/{}.mp3", task_id)),
          image_url: None,
        })
        .await?;
      info!(?outcome, "Callback ingested.");
    }
  }

  // Wait for the polled job to settle the order.
  while !store.get_order(order.id).await?.status.is_settled() {
    tokio::time::sleep(Duration::from_millis(50)).await;
  }
  orchestrator.shutdown().await;

  let settled = store.get_order(order.id).await?;
  info!(
    status = settled.status.as_str(),
    notification = settled.notification_status.as_str(),
    "Done."
  );
  Ok(())
}
