// songforge/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ForgeError {
  #[error("{entity} not found: {id}")]
  NotFound { entity: &'static str, id: String },

  #[error("Order {order_id} has no confirmed payment; fulfillment cannot start")]
  PaymentNotConfirmed { order_id: Uuid },

  #[error("Order {order_id} has no items to generate")]
  EmptyOrder { order_id: Uuid },

  #[error("Generation provider error: {message}")]
  Provider { message: String },

  #[error("Store operation '{operation}' failed. Source: {source}")]
  Store {
    operation: &'static str,
    #[source]
    source: AnyhowError,
  },

  #[error("Notification transport failed: {message}")]
  Transport { message: String },

  #[error("Handler missing for non-optional step: {step_name}")]
  HandlerMissing { step_name: String },

  #[error("Error in collaborator or handler. Source: {source}")]
  Collaborator {
    #[source]
    source: AnyhowError,
  },

  #[error("Internal orchestrator error: {0}")]
  Internal(String),
}

impl ForgeError {
  pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
    ForgeError::NotFound {
      entity,
      id: id.to_string(),
    }
  }

  pub fn store(operation: &'static str, source: impl Into<AnyhowError>) -> Self {
    ForgeError::Store {
      operation,
      source: source.into(),
    }
  }

  pub fn provider(message: impl Into<String>) -> Self {
    ForgeError::Provider {
      message: message.into(),
    }
  }

  pub fn transport(message: impl Into<String>) -> Self {
    ForgeError::Transport {
      message: message.into(),
    }
  }
}

impl From<AnyhowError> for ForgeError {
  fn from(err: AnyhowError) -> Self {
    // Unwrap a ForgeError that travelled through anyhow instead of nesting it.
    match err.downcast::<ForgeError>() {
      Ok(forge_err) => forge_err,
      Err(source) => ForgeError::Collaborator { source },
    }
  }
}

pub type ForgeResult<T, E = ForgeError> = std::result::Result<T, E>;
