// songforge_app/src/services/mod.rs

pub mod mailer;
pub mod pg_store;
pub mod provider_client;
pub mod provider_mock;
pub mod signature;
