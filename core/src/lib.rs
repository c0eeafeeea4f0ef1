// src/lib.rs

//! SongForge: fulfillment orchestration for paid, AI-generated songs.
//!
//! Given a paid order, SongForge:
//!  - Fans out one generation request per order item to an external provider.
//!  - Tracks each job to a terminal state, by provider push (webhook) or by
//!    bounded per-job polling, decided per submission.
//!  - Settles the order once every job is terminal, tolerating partial failure.
//!  - Notifies the customer exactly once per settled order.
//!
//! Persistence, the provider and the mail transport are collaborators behind
//! async traits (`JobStore`, `OrderStore`, `GenerationProvider`,
//! `NotificationTransport`); an in-memory store ships with the crate.

pub mod aggregator;
pub mod error;
pub mod ingest;
pub mod models;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod settings;
pub mod store;
pub mod waiter;

// --- Re-exports for the Public API ---

pub use crate::aggregator::{classify, FanOutReport, JobDispatch, OrderAggregator, Settlement};
pub use crate::error::{ForgeError, ForgeResult};
pub use crate::ingest::{IngestOutcome, ProviderCallback, WebhookIngest};
pub use crate::models::{
  Artifact, FailureReason, GenerationJob, JobOutcome, JobStatus, NotificationStatus, Order, OrderItem, OrderStatus,
  SubmissionMode,
};
pub use crate::notifier::{
  compose, dominant_language, CompletedTrack, CustomerNotification, DeliveryReceipt, NotificationKind,
  NotificationTransport, Notifier,
};
pub use crate::orchestrator::Orchestrator;
pub use crate::pipeline::{ContextData, Pipeline, PipelineControl, PipelineResult, StepDef};
pub use crate::provider::{GenerationProvider, Submission, TaskState, TaskStatus};
pub use crate::settings::OrchestratorSettings;
pub use crate::store::{JobStore, MemoryStore, OrderStore};
pub use crate::waiter::{CompletionWaiter, WaitResult};

/*
    Lifecycle of one order:
    1. Payment is captured elsewhere; the order carries a payment reference.
    2. `Orchestrator::fulfill(order_id)` runs the fan-out pipeline:
       load_paid_order -> create_generation_jobs -> submit_generation_requests
       -> dispatch_completion_tracking.
    3. Webhook-mode jobs are terminalized by `Orchestrator::ingest(callback)`;
       polling-mode jobs by their own `CompletionWaiter` task.
    4. Every terminalization calls `OrderAggregator::check_settlement`. The
       caller that wins the `pending -> dispatching` claim queues the order.
    5. The notifier worker composes and sends the message, then records
       `sent` or `failed`. Failed deliveries can be retried out of band.
*/
