// songforge/src/models/mod.rs

//! Orders, order items and the generation jobs derived from them.

pub mod job;
pub mod order;
pub mod order_item;

pub use job::{Artifact, FailureReason, GenerationJob, JobOutcome, JobStatus, SubmissionMode};
pub use order::{NotificationStatus, Order, OrderStatus};
pub use order_item::OrderItem;
