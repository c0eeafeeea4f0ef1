// songforge_app/src/web/routes.rs

use crate::web::handlers::{job_handlers, order_handlers, webhook_handlers};
use actix_web::web;

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/orders/{order_id}")
          // Called by the payment flow once the charge is confirmed. Safe to repeat.
          .route("/fulfill", web::post().to(order_handlers::fulfill_order_handler))
          .route("/jobs", web::get().to(order_handlers::order_jobs_handler))
          .route(
            "/notification/retry",
            web::post().to(order_handlers::retry_notification_handler),
          ),
      )
      .route(
        "/notifications/retry-failed",
        web::post().to(order_handlers::retry_failed_notifications_handler),
      )
      .route("/jobs/{job_id}", web::get().to(job_handlers::job_status_handler))
      .service(
        web::scope("/webhooks").route(
          "/provider-callback",
          web::post().to(webhook_handlers::provider_callback_handler),
        ),
      ),
  );
}
