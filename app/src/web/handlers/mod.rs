// songforge_app/src/web/handlers/mod.rs

pub mod job_handlers;
pub mod order_handlers;
pub mod webhook_handlers;
