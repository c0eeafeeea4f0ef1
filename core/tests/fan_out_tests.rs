// tests/fan_out_tests.rs
mod common;

use common::*;
use songforge::{
  FailureReason, ForgeError, JobStatus, JobStore, NotificationKind, NotificationStatus, Order, OrderItem, OrderStatus,
  OrderStore, ProviderCallback, Settlement, SubmissionMode, TaskState,
};
use serial_test::serial;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
#[serial]
async fn test_fan_out_creates_one_job_per_item() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, items) = seed_order(&h.store, &["first-dance", "birthday", "anniversary", "lullaby"]);

  let report = h.orchestrator.fulfill(order.id).await.expect("fan-out succeeds");

  assert!(report.newly_started);
  assert_eq!(report.jobs.len(), 4);
  assert_eq!(report.count_mode(SubmissionMode::Webhook), 4);
  assert_eq!(report.settlement, Some(Settlement::Unsettled { pending: 4 }));

  let jobs = h.store.jobs_for_order(order.id).await.unwrap();
  assert_eq!(jobs.len(), items.len());
  for item in &items {
    let matching: Vec<_> = jobs.iter().filter(|j| j.order_item_id == item.id).collect();
    assert_eq!(matching.len(), 1, "exactly one job for item {}", item.label);
    let job = matching[0];
    assert_eq!(job.order_id, order.id);
    assert_eq!(job.status, JobStatus::Generating);
    assert_eq!(job.task_ids, vec![task_id(&item.label, 0)]);
  }
  assert_eq!(h.provider.submits(), 4);

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_fan_out_twice_does_not_resubmit() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, _) = seed_order(&h.store, &["only-once-a", "only-once-b"]);

  let first = h.orchestrator.fulfill(order.id).await.unwrap();
  let second = h.orchestrator.fulfill(order.id).await.unwrap();

  assert!(first.newly_started);
  assert!(!second.newly_started);
  assert_eq!(h.provider.submits(), 2);
  assert_eq!(h.store.jobs_for_order(order.id).await.unwrap().len(), 2);

  let mut first_ids: Vec<Uuid> = first.jobs.iter().map(|j| j.job_id).collect();
  let mut second_ids: Vec<Uuid> = second.jobs.iter().map(|j| j.job_id).collect();
  first_ids.sort();
  second_ids.sort();
  assert_eq!(first_ids, second_ids);

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_fan_out_rejects_unpaid_order() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let mut order = Order::new_paid(Uuid::new_v4(), "listener@example.com", "pay_x", 2_900);
  order.payment_reference = None;
  let item = OrderItem::new(order.id, "unpaid", "no money no music", &["blues"]);
  h.store.insert_order(order.clone(), vec![item]);

  let result = h.orchestrator.fulfill(order.id).await;

  assert!(matches!(result, Err(ForgeError::PaymentNotConfirmed { order_id }) if order_id == order.id));
  assert_eq!(h.provider.submits(), 0);
  assert!(h.store.jobs_for_order(order.id).await.unwrap().is_empty());

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_fan_out_rejects_empty_and_unknown_orders() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, _) = seed_order(&h.store, &[]);

  let empty = h.orchestrator.fulfill(order.id).await;
  assert!(matches!(empty, Err(ForgeError::EmptyOrder { .. })));

  let unknown = h.orchestrator.fulfill(Uuid::new_v4()).await;
  assert!(matches!(unknown, Err(ForgeError::NotFound { entity: "order", .. })));

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_rejected_submission_fails_job_without_waiting() {
  setup_tracing();
  let provider = ScriptedProvider::new()
    .script("accepted", ItemScript::webhook())
    .script("refused", ItemScript::rejected("content policy violation"));
  let h = harness(provider, RecordingTransport::new(), webhook_settings());
  let (order, items) = seed_order(&h.store, &["accepted", "refused"]);

  let report = h.orchestrator.fulfill(order.id).await.unwrap();
  assert_eq!(report.settlement, Some(Settlement::Unsettled { pending: 1 }));

  let refused = report.jobs.iter().find(|j| j.order_item_id == items[1].id).unwrap();
  assert_eq!(refused.status, JobStatus::Failed);
  assert_eq!(refused.mode, None);

  let job = h.orchestrator.job_status(refused.job_id).await.unwrap();
  match job.failure {
    Some(FailureReason::SubmissionRejected(detail)) => assert!(detail.contains("content policy violation")),
    other => panic!("expected a submission rejection, got {:?}", other),
  }

  tokio::time::sleep(Duration::from_millis(50)).await;
  assert_eq!(h.provider.status_calls.load(Ordering::SeqCst), 0, "no waiter polls a rejected job");

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_all_submissions_rejected_settles_as_failed() {
  setup_tracing();
  let provider = ScriptedProvider::new()
    .script("nope-1", ItemScript::rejected("quota exceeded"))
    .script("nope-2", ItemScript::rejected("quota exceeded"));
  let h = harness(provider, RecordingTransport::new(), webhook_settings());
  let (order, _) = seed_order(&h.store, &["nope-1", "nope-2"]);

  let report = h.orchestrator.fulfill(order.id).await.unwrap();
  assert!(report.settlement.map_or(false, |s| s.is_settled()));

  let settled = wait_for_notification(&h.store, order.id, NotificationStatus::Sent).await;
  assert_eq!(settled.status, OrderStatus::Failed);

  let sent = h.transport.sent_for(order.id);
  assert_eq!(sent.len(), 1);
  assert_eq!(sent[0].kind, NotificationKind::GenerationFailed { failed_count: 2 });

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_no_callback_url_forces_polling_mode() {
  setup_tracing();
  let provider = ScriptedProvider::new().script("quiet", ItemScript::webhook());
  let h = harness(provider, RecordingTransport::new(), polling_settings(Duration::from_secs(5)));
  let (order, _) = seed_order(&h.store, &["quiet"]);

  let report = h.orchestrator.fulfill(order.id).await.unwrap();

  assert_eq!(report.count_mode(SubmissionMode::Polling), 1);
  assert_eq!(report.count_mode(SubmissionMode::Webhook), 0);

  h.orchestrator.shutdown().await;
}

fn steady_polling() -> ItemScript {
  ItemScript::polling(vec![
    Poll::Running,
    Poll::Succeeded {
      audio: Some("https://cdn.example.com/steady.mp3"),
    },
  ])
}

#[tokio::test]
#[serial]
async fn test_unrecordable_submission_fails_only_its_own_job() {
  setup_tracing();
  let provider = ScriptedProvider::new().script("steady", steady_polling());
  let (h, flaky) = flaky_harness(provider, RecordingTransport::new(), webhook_settings());
  let (order, items) = seed_order(&h.store, &["steady", "unrecorded"]);
  flaky.fail_recording_for("unrecorded");

  let report = h.orchestrator.fulfill(order.id).await.expect("other items keep going");
  assert_eq!(report.jobs.len(), 2);
  assert_eq!(report.count_mode(SubmissionMode::Polling), 1);

  let jobs = h.store.jobs_for_order(order.id).await.unwrap();
  let lost = jobs.iter().find(|j| j.order_item_id == items[1].id).unwrap();
  assert_eq!(lost.status, JobStatus::Failed);
  match &lost.failure {
    Some(FailureReason::SubmissionRejected(detail)) => assert!(detail.contains("could not record submission")),
    other => panic!("expected a submission failure, got {:?}", other),
  }

  let notified = wait_for_notification(&h.store, order.id, NotificationStatus::Sent).await;
  assert_eq!(notified.status, OrderStatus::PartiallyFulfilled);
  let sent = h.transport.sent_for(order.id);
  assert_eq!(sent.len(), 1);
  match &sent[0].kind {
    NotificationKind::Ready { tracks, failed_count } => {
      assert_eq!(tracks.len(), 1);
      assert_eq!(tracks[0].label, "steady");
      assert_eq!(*failed_count, 1);
    }
    other => panic!("expected Ready, got {:?}", other),
  }

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_unapplied_submission_is_reported_and_retrigger_repairs_it() {
  setup_tracing();
  let provider = ScriptedProvider::new().script("steady", steady_polling());
  let (h, flaky) = flaky_harness(provider, RecordingTransport::new(), webhook_settings());
  let (order, items) = seed_order(&h.store, &["steady", "contested"]);
  flaky.ignore_recording_for("contested");

  let err = h.orchestrator.fulfill(order.id).await.expect_err("unrecorded submission is reported");
  assert!(matches!(err, ForgeError::Internal(_)), "got {:?}", err);

  let jobs = h.store.jobs_for_order(order.id).await.unwrap();
  let contested = jobs.iter().find(|j| j.order_item_id == items[1].id).unwrap().clone();
  assert_eq!(contested.status, JobStatus::Generating, "the job is not failed for it");
  assert!(contested.mode.is_none());

  // The polled item was tracked regardless.
  let steady_id = jobs.iter().find(|j| j.order_item_id == items[0].id).unwrap().id;
  assert_eq!(wait_for_terminal_job(&h.store, steady_id).await.status, JobStatus::Completed);
  let waiting = h.store.get_order(order.id).await.unwrap();
  assert_eq!(waiting.notification_status, NotificationStatus::Pending);

  flaky.heal();
  let retry = h.orchestrator.fulfill(order.id).await.unwrap();
  assert!(!retry.newly_started);
  assert_eq!(retry.jobs.len(), 2);
  assert_eq!(h.provider.submits(), 3, "only the unrecorded item goes out again");
  let contested = h.store.get_job(contested.id).await.unwrap();
  assert_eq!(contested.mode, Some(SubmissionMode::Webhook));
  assert_eq!(contested.task_ids, vec![task_id("contested", 0)]);

  h.orchestrator
    .ingest(ProviderCallback {
      task_id: task_id("contested", 0),
      state: TaskState::Succeeded,
      audio_url: Some("https://cdn.example.com/contested.mp3".to_string()),
      image_url: None,
    })
    .await
    .unwrap();

  let notified = wait_for_notification(&h.store, order.id, NotificationStatus::Sent).await;
  assert_eq!(notified.status, OrderStatus::Fulfilled);
  assert_eq!(h.transport.sent_for(order.id).len(), 1);

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_retrigger_finishes_an_interrupted_fan_out() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, items) = seed_order(&h.store, &["made-a", "made-b", "never-made"]);

  // An earlier run set the flag and created one job, then stopped.
  assert!(h.store.begin_fan_out(order.id).await.unwrap());
  let orphan = h.store.create_job(order.id, items[0].id).await.unwrap();

  let report = h.orchestrator.fulfill(order.id).await.unwrap();
  assert!(!report.newly_started);
  assert_eq!(report.jobs.len(), 3);
  assert_eq!(report.count_mode(SubmissionMode::Webhook), 3);
  assert_eq!(h.provider.submits(), 3);

  let jobs = h.store.jobs_for_order(order.id).await.unwrap();
  assert_eq!(jobs.len(), 3);
  let reused = jobs.iter().find(|j| j.order_item_id == items[0].id).unwrap();
  assert_eq!(reused.id, orphan.id);
  assert_eq!(reused.mode, Some(SubmissionMode::Webhook));

  // Nothing is left to repair.
  let again = h.orchestrator.fulfill(order.id).await.unwrap();
  assert_eq!(again.jobs.len(), 3);
  assert_eq!(again.settlement, Some(Settlement::Unsettled { pending: 3 }));
  assert_eq!(h.provider.submits(), 3);

  h.orchestrator.shutdown().await;
}

#[tokio::test]
#[serial]
async fn test_job_creation_is_idempotent_per_item() {
  setup_tracing();
  let h = harness(ScriptedProvider::new(), RecordingTransport::new(), webhook_settings());
  let (order, items) = seed_order(&h.store, &["single"]);

  let first = h.store.create_job(order.id, items[0].id).await.unwrap();
  let second = h.store.create_job(order.id, items[0].id).await.unwrap();

  assert_eq!(first.id, second.id);
  assert_eq!(h.store.jobs_for_order(order.id).await.unwrap().len(), 1);

  h.orchestrator.shutdown().await;
}
