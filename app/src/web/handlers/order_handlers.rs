// songforge_app/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;

/// Fans a paid order out into generation jobs.
///
/// `202 Accepted` the first time; a repeated trigger answers `200 OK` with the
/// jobs the first one created.
#[instrument(name = "handler::fulfill_order", skip(app_state), fields(order_id = %order_id))]
pub async fn fulfill_order_handler(
  app_state: web::Data<AppState>,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let report = app_state.orchestrator.fulfill(order_id.into_inner()).await?;
  info!(
    newly_started = report.newly_started,
    jobs = report.jobs.len(),
    "Fulfillment triggered."
  );
  if report.newly_started {
    Ok(HttpResponse::Accepted().json(report))
  } else {
    Ok(HttpResponse::Ok().json(report))
  }
}

#[instrument(name = "handler::order_jobs", skip(app_state), fields(order_id = %order_id))]
pub async fn order_jobs_handler(
  app_state: web::Data<AppState>,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let (order, jobs) = app_state.orchestrator.order_view(order_id.into_inner()).await?;
  Ok(HttpResponse::Ok().json(json!({
    "order_id": order.id,
    "status": order.status,
    "notification_status": order.notification_status,
    "notification_error": order.notification_error,
    "jobs": jobs,
  })))
}

#[instrument(name = "handler::retry_notification", skip(app_state), fields(order_id = %order_id))]
pub async fn retry_notification_handler(
  app_state: web::Data<AppState>,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let order_id = order_id.into_inner();
  match app_state.orchestrator.retry_notification(order_id).await? {
    Some(receipt) => Ok(HttpResponse::Ok().json(json!({
      "order_id": order_id,
      "retried": true,
      "message_id": receipt.message_id,
    }))),
    None => Ok(HttpResponse::Ok().json(json!({
      "order_id": order_id,
      "retried": false,
    }))),
  }
}

/// Re-sends every failed customer notification.
#[instrument(name = "handler::retry_failed_notifications", skip(app_state))]
pub async fn retry_failed_notifications_handler(app_state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
  let delivered = app_state.orchestrator.retry_failed_notifications().await?;
  Ok(HttpResponse::Ok().json(json!({ "delivered": delivered })))
}
