// songforge_app/src/web/handlers/job_handlers.rs

use actix_web::{web, HttpResponse};
use tracing::instrument;
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;

#[instrument(name = "handler::job_status", skip(app_state), fields(job_id = %job_id))]
pub async fn job_status_handler(
  app_state: web::Data<AppState>,
  job_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let job = app_state.orchestrator.job_status(job_id.into_inner()).await?;
  Ok(HttpResponse::Ok().json(job))
}
