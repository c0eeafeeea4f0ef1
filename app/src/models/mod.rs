// songforge_app/src/models/mod.rs

//! Postgres row shapes and their conversion into orchestrator types.

pub mod job;
pub mod order;

pub use job::JobRow;
pub use order::{OrderItemRow, OrderRow};
