// songforge_app/src/errors.rs

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use songforge::ForgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Payment Required: {0}")]
  Payment(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  /// The generation provider or the mail API misbehaved.
  #[error("Upstream Service Error: {0}")]
  Upstream(String),

  #[error("Orchestrator Error: {source}")]
  Orchestrator { source: ForgeError },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<ForgeError> for AppError {
  fn from(err: ForgeError) -> Self {
    match err {
      ForgeError::NotFound { .. } => AppError::NotFound(err.to_string()),
      ForgeError::PaymentNotConfirmed { .. } => AppError::Payment(err.to_string()),
      ForgeError::EmptyOrder { .. } => AppError::Validation(err.to_string()),
      ForgeError::Provider { .. } | ForgeError::Transport { .. } => AppError::Upstream(err.to_string()),
      other => AppError::Orchestrator { source: other },
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<sqlx::Error>() {
      Ok(sqlx_err) => AppError::Sqlx(sqlx_err),
      Err(err) => match err.downcast::<ForgeError>() {
        Ok(forge_err) => forge_err.into(),
        Err(err) => AppError::Internal(err.to_string()),
      },
    }
  }
}

impl ResponseError for AppError {
  fn error_response(&self) -> HttpResponse {
    tracing::error!(application_error = %self, "Responding with error");
    match self {
      AppError::Validation(m) => HttpResponse::BadRequest().json(json!({"error": m})),
      AppError::Auth(m) => HttpResponse::Unauthorized().json(json!({"error": m})),
      AppError::NotFound(m) => HttpResponse::NotFound().json(json!({"error": m})),
      AppError::Payment(m) => HttpResponse::PaymentRequired().json(json!({"error": m})),
      AppError::Config(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "Configuration issue", "detail": m}))
      }
      AppError::Sqlx(_) => HttpResponse::InternalServerError().json(json!({"error": "Database operation failed"})),
      AppError::Upstream(m) => HttpResponse::BadGateway().json(json!({"error": "Upstream service error", "detail": m})),
      AppError::Orchestrator { source } => {
        tracing::error!(orchestrator_error_source = ?source, "Orchestrator error details");
        HttpResponse::InternalServerError()
          .json(json!({"error": "Fulfillment processing error", "detail": source.to_string()}))
      }
      AppError::Internal(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "An internal error occurred", "detail": m}))
      }
    }
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;
  use actix_web::http::StatusCode;
  use uuid::Uuid;

  #[test]
  fn forge_errors_map_to_http_statuses() {
    let cases = [
      (ForgeError::not_found("order", Uuid::nil()), StatusCode::NOT_FOUND),
      (ForgeError::PaymentNotConfirmed { order_id: Uuid::nil() }, StatusCode::PAYMENT_REQUIRED),
      (ForgeError::EmptyOrder { order_id: Uuid::nil() }, StatusCode::BAD_REQUEST),
      (ForgeError::provider("503 from upstream"), StatusCode::BAD_GATEWAY),
      (ForgeError::Internal("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (forge_err, expected) in cases {
      let app_err = AppError::from(forge_err);
      assert_eq!(app_err.error_response().status(), expected, "{}", app_err);
    }
  }

  #[test]
  fn auth_errors_are_unauthorized() {
    let err = AppError::Auth("bad signature".to_string());
    assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);
  }
}
