// songforge_app/src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use songforge::{IngestOutcome, ProviderCallback};
use tracing::{info, instrument, warn};

use crate::errors::AppError;
use crate::services::provider_client::WireTaskStatus;
use crate::services::signature;
use crate::state::AppState;

/// Checks the signature (when a secret is configured) and decodes the body.
pub fn decode_callback(secret: Option<&str>, signature_header: Option<&str>, body: &[u8]) -> Result<ProviderCallback, AppError> {
  if let Some(secret) = secret {
    let header = signature_header.ok_or_else(|| AppError::Auth("missing callback signature".to_string()))?;
    if !signature::verify(secret, body, header) {
      return Err(AppError::Auth("invalid callback signature".to_string()));
    }
  }

  let wire: WireTaskStatus =
    serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("malformed callback body: {}", e)))?;
  let task_id = wire
    .task_id
    .clone()
    .filter(|id| !id.trim().is_empty())
    .ok_or_else(|| AppError::Validation("callback is missing taskId".to_string()))?;
  let status = wire
    .into_status(&task_id)
    .map_err(|e| AppError::Validation(e.to_string()))?;
  Ok(status.into())
}

/// Provider push endpoint.
///
/// Answers quickly: recording the result and claiming settlement happen
/// inline, the customer email is handed to the notifier worker.
#[instrument(
  name = "handler::provider_callback",
  skip(app_state, req, body),
  fields(payload_bytes = body.len())
)]
pub async fn provider_callback_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let signature_header = req
    .headers()
    .get(signature::SIGNATURE_HEADER)
    .and_then(|h_val| h_val.to_str().ok());
  let callback = decode_callback(app_state.config.webhook_secret.as_deref(), signature_header, &body)?;
  let task_id = callback.task_id.clone();

  let outcome = app_state.orchestrator.ingest(callback).await?;
  match &outcome {
    IngestOutcome::UnknownTask => {
      // Usually the callback raced the submission bookkeeping; a 404 makes
      // the provider deliver it again.
      warn!(%task_id, "Callback for a task no job carries (yet).");
      Ok(HttpResponse::NotFound().json(outcome))
    }
    other => {
      info!(%task_id, ?other, "Provider callback processed.");
      Ok(HttpResponse::Ok().json(outcome))
    }
  }
}
