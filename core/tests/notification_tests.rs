// tests/notification_tests.rs
mod common;

use common::*;
use songforge::{
  compose, dominant_language, Artifact, FailureReason, GenerationJob, IngestOutcome, JobOutcome, JobStatus, JobStore,
  NotificationKind, NotificationStatus, Order, OrderItem, OrderStatus, OrderStore, ProviderCallback, Settlement,
  TaskState,
};
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

fn done(label: &str) -> ProviderCallback {
  ProviderCallback {
    task_id: task_id(label, 0),
    state: TaskState::Succeeded,
    audio_url: Some(format!("https://cdn.example.com/{}.mp3", label)),
    image_url: None,
  }
}

#[tokio::test]
#[serial]
async fn test_failed_delivery_keeps_order_settled_and_retry_sends_once() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::failing(1), webhook_settings());
  let (order, _) = seed_order(&h.store, &["retry-me"]);
  h.orchestrator.fulfill(order.id).await.unwrap();
  h.orchestrator.ingest(done("retry-me")).await.unwrap();

  let failed = wait_for_notification(&h.store, order.id, NotificationStatus::Failed).await;
  assert_eq!(failed.notification_status, NotificationStatus::Failed);
  assert_eq!(failed.status, songforge::OrderStatus::Fulfilled);
  assert!(failed.notification_error.as_deref().unwrap_or_default().contains("mail relay refused"));
  assert!(h.transport.sent_for(order.id).is_empty());

  let receipt = h.orchestrator.retry_notification(order.id).await.unwrap();
  assert!(receipt.is_some());

  let sent = wait_for_notification(&h.store, order.id, NotificationStatus::Sent).await;
  assert_eq!(sent.notification_message_id, receipt.map(|r| r.message_id));
  assert!(sent.notification_error.is_none());
  assert_eq!(h.transport.sent_for(order.id).len(), 1);
  assert_eq!(h.provider.submits(), 1, "retry never re-runs generation");

  // A second retry is a no-op: the order is no longer in the failed state.
  assert!(h.orchestrator.retry_notification(order.id).await.unwrap().is_none());
  assert_eq!(h.transport.attempts.load(Ordering::SeqCst), 2);

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_retry_skips_orders_not_yet_settled() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, _) = seed_order(&h.store, &["in-flight"]);
  h.orchestrator.fulfill(order.id).await.unwrap();

  assert!(h.orchestrator.retry_notification(order.id).await.unwrap().is_none());
  assert_eq!(h.transport.attempts.load(Ordering::SeqCst), 0);

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_retry_all_failed_sweeps_every_unnotified_order() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::failing(2), webhook_settings());
  let (first, _) = seed_order(&h.store, &["sweep-1"]);
  let (second, _) = seed_order(&h.store, &["sweep-2"]);
  for order_id in [first.id, second.id] {
    h.orchestrator.fulfill(order_id).await.unwrap();
  }
  h.orchestrator.ingest(done("sweep-1")).await.unwrap();
  h.orchestrator.ingest(done("sweep-2")).await.unwrap();

  wait_for_notification(&h.store, first.id, NotificationStatus::Failed).await;
  wait_for_notification(&h.store, second.id, NotificationStatus::Failed).await;

  assert_eq!(h.orchestrator.retry_failed_notifications().await.unwrap(), 2);
  assert_eq!(h.orchestrator.retry_failed_notifications().await.unwrap(), 0);
  assert_eq!(h.transport.sent().len(), 2);

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_shutdown_flushes_queued_notifications() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, _) = seed_order(&h.store, &["flush"]);
  h.orchestrator.fulfill(order.id).await.unwrap();
  h.orchestrator.ingest(done("flush")).await.unwrap();

  h.orchestrator.shutdown().await;

  assert!(h.transport.wait_for_attempts(1, Duration::from_millis(100)).await);
  assert_eq!(h.transport.sent_for(order.id).len(), 1);
}

#[tokio::test]
#[serial]
async fn test_order_settled_after_shutdown_is_left_for_retry() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, _) = seed_order(&h.store, &["late"]);
  h.orchestrator.fulfill(order.id).await.unwrap();
  h.orchestrator.shutdown().await;

  // The worker is gone; the claim must not strand the order in dispatching.
  let outcome = h.orchestrator.ingest(done("late")).await.unwrap();
  assert!(matches!(
    outcome,
    IngestOutcome::Recorded {
      settlement: Settlement::Settled { claimed: true, .. },
      ..
    }
  ));
  let stranded = h.store.get_order(order.id).await.unwrap();
  assert_eq!(stranded.notification_status, NotificationStatus::Failed);
  assert!(stranded
    .notification_error
    .as_deref()
    .unwrap_or_default()
    .contains("notification worker is gone"));
  assert!(h.transport.sent_for(order.id).is_empty());

  assert!(h.orchestrator.retry_notification(order.id).await.unwrap().is_some());
  assert_eq!(h.transport.sent_for(order.id).len(), 1);
  let sent = h.store.get_order(order.id).await.unwrap();
  assert_eq!(sent.notification_status, NotificationStatus::Sent);
}

#[tokio::test]
#[serial]
async fn test_resume_requeues_orders_left_dispatching() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, items) = seed_order(&h.store, &["interrupted"]);

  // A previous process claimed the order, then stopped before sending.
  let job = h.store.create_job(order.id, items[0].id).await.unwrap();
  let artifact = Artifact {
    audio_url: "https://cdn.example.com/interrupted.mp3".to_string(),
    image_url: None,
  };
  assert!(h.store.try_terminalize(job.id, JobOutcome::Completed(artifact)).await.unwrap());
  assert!(h.store.claim_settlement(order.id, OrderStatus::Fulfilled).await.unwrap());

  assert_eq!(h.orchestrator.resume_notifications().await.unwrap(), 1);
  let sent = wait_for_notification(&h.store, order.id, NotificationStatus::Sent).await;
  assert_eq!(sent.notification_status, NotificationStatus::Sent);
  let delivered = h.transport.sent_for(order.id);
  assert_eq!(delivered.len(), 1);
  assert!(matches!(&delivered[0].kind, NotificationKind::Ready { tracks, .. } if tracks.len() == 1));

  assert_eq!(h.orchestrator.resume_notifications().await.unwrap(), 0);

  h.orchestrator.shutdown().await;
}

// --- Composition ---

fn item(order: &Order, label: &str, language: Option<&str>) -> OrderItem {
  let mut item = OrderItem::new(order.id, label, "lyrics", &["folk"]);
  item.language = language.map(str::to_string);
  item
}

fn terminal_job(item: &OrderItem, outcome: Option<&str>) -> GenerationJob {
  let mut job = GenerationJob::new(item.order_id, item.id);
  match outcome {
    Some(audio) => {
      job.status = JobStatus::Completed;
      job.artifact = Some(Artifact {
        audio_url: audio.to_string(),
        image_url: None,
      });
    }
    None => {
      job.status = JobStatus::Failed;
      job.failure = Some(FailureReason::Timeout);
    }
  }
  job
}

#[test]
fn test_compose_carries_only_completed_tracks() {
  let order = Order::new_paid(Uuid::new_v4(), "fan@example.com", "pay_1", 5_800);
  let ok = item(&order, "Ocean Eyes", Some("en"));
  let bad = item(&order, "Lost Song", Some("en"));
  let jobs = vec![terminal_job(&ok, Some("https://cdn.example.com/ocean.mp3")), terminal_job(&bad, None)];

  let notification = compose(&order, &[ok.clone(), bad], &jobs);

  assert_eq!(notification.recipient, "fan@example.com");
  assert_eq!(notification.language.as_deref(), Some("en"));
  match notification.kind {
    NotificationKind::Ready { tracks, failed_count } => {
      assert_eq!(failed_count, 1);
      assert_eq!(tracks.len(), 1);
      assert_eq!(tracks[0].label, "Ocean Eyes");
      assert_eq!(tracks[0].order_item_id, ok.id);
      assert_eq!(tracks[0].audio_url, "https://cdn.example.com/ocean.mp3");
    }
    other => panic!("expected Ready, got {:?}", other),
  }
}

#[test]
fn test_compose_all_failed_is_generation_failed() {
  let order = Order::new_paid(Uuid::new_v4(), "fan@example.com", "pay_2", 2_900);
  let lost = item(&order, "Lost", None);
  let jobs = vec![terminal_job(&lost, None)];

  let notification = compose(&order, &[lost], &jobs);

  assert_eq!(notification.kind, NotificationKind::GenerationFailed { failed_count: 1 });
  assert_eq!(notification.language, None);
}

#[test]
fn test_language_majority_vote() {
  let order = Order::new_paid(Uuid::new_v4(), "fan@example.com", "pay_3", 0);
  let majority = vec![
    item(&order, "a", Some("es")),
    item(&order, "b", Some("en")),
    item(&order, "c", Some("es")),
    item(&order, "d", None),
  ];
  assert_eq!(dominant_language(&majority).as_deref(), Some("es"));

  let tie = vec![item(&order, "a", Some("pt")), item(&order, "b", Some("de"))];
  assert_eq!(dominant_language(&tie).as_deref(), Some("de"));

  let none = vec![item(&order, "a", None)];
  assert_eq!(dominant_language(&none), None);
}

#[test]
fn test_outcome_status_mapping() {
  assert_eq!(JobOutcome::Failed(FailureReason::MissingArtifact).status(), JobStatus::Failed);
  assert_eq!(FailureReason::Timeout.to_string(), "timeout");
  assert_eq!(
    FailureReason::SubmissionRejected("quota".to_string()).to_string(),
    "submission rejected: quota"
  );
}
