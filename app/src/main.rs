// songforge_app/src/main.rs

mod config;
mod errors;
mod models;
mod services;
mod state;
mod web;

use crate::config::AppConfig;
use crate::errors::{AppError, Result as AppResult};
use crate::services::mailer::{HttpMailer, LogMailer};
use crate::services::pg_store::PgStore;
use crate::services::provider_client::HttpGenerationProvider;
use crate::services::provider_mock::MockGenerationProvider;
use crate::state::AppState;

use actix_web::{web as actix_data, App, HttpServer};
use songforge::{GenerationProvider, JobStore, MemoryStore, NotificationTransport, Orchestrator, Order, OrderItem, OrderStore};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan; // For span events in tracing
use uuid::Uuid;

enum Stores {
  Postgres(PgStore),
  Memory(Arc<MemoryStore>),
}

impl Stores {
  async fn connect(config: &AppConfig) -> AppResult<Self> {
    match &config.database_url {
      Some(url) => {
        let pool = PgPool::connect(url).await?;
        let store = PgStore::new(pool);
        store.migrate().await?;
        tracing::info!("Connected to the database and applied the schema.");
        Ok(Stores::Postgres(store))
      }
      None => {
        tracing::warn!("DATABASE_URL is not set; orders and jobs live in memory only.");
        Ok(Stores::Memory(Arc::new(MemoryStore::new())))
      }
    }
  }

  fn handles(&self) -> (Arc<dyn JobStore>, Arc<dyn OrderStore>) {
    match self {
      Stores::Postgres(pg) => {
        let jobs: Arc<dyn JobStore> = Arc::new(pg.clone());
        let orders: Arc<dyn OrderStore> = Arc::new(pg.clone());
        (jobs, orders)
      }
      Stores::Memory(mem) => {
        let jobs: Arc<dyn JobStore> = mem.clone();
        let orders: Arc<dyn OrderStore> = mem.clone();
        (jobs, orders)
      }
    }
  }

  /// Inserts one paid demo order with three songs, one of which fails.
  async fn seed_demo_order(&self) -> AppResult<Uuid> {
    let order = Order::new_paid(Uuid::new_v4(), "listener@example.com", "pay_demo_seed", 8_997);
    let mut birthday = OrderItem::new(order.id, "Birthday for Ana", "Today the sun came up for you", &["pop", "upbeat"]);
    birthday.language = Some("en".to_string());
    let lullaby = OrderItem::new(order.id, "Lullaby", "Hush now, the stars are out", &["acoustic", "soft"]);
    let failing = OrderItem::new(order.id, "Song that will fail", "This one never makes it", &["rock"]);
    let items = vec![birthday, lullaby, failing];

    match self {
      Stores::Postgres(pg) => pg.insert_order(&order, &items).await?,
      Stores::Memory(mem) => mem.insert_order(order.clone(), items),
    }
    Ok(order.id)
  }
}

fn build_provider(config: &AppConfig) -> AppResult<Arc<dyn GenerationProvider>> {
  let provider: Arc<dyn GenerationProvider> = match &config.provider_base_url {
    Some(base_url) => Arc::new(HttpGenerationProvider::new(
      base_url.clone(),
      config.provider_api_key.clone(),
    )?),
    None => {
      tracing::warn!("PROVIDER_BASE_URL is not set; using the mock generation provider.");
      Arc::new(MockGenerationProvider::new(
        Duration::from_secs(5),
        config.provider_callbacks_enabled,
        config.webhook_secret.clone(),
      ))
    }
  };
  Ok(provider)
}

fn build_mailer(config: &AppConfig) -> AppResult<Arc<dyn NotificationTransport>> {
  let mailer: Arc<dyn NotificationTransport> = match &config.mail_api_url {
    Some(api_url) => Arc::new(HttpMailer::new(
      api_url.clone(),
      config.mail_api_key.clone(),
      config.mail_sender.clone(),
    )?),
    None => Arc::new(LogMailer::new(config.mail_sender.clone())),
  };
  Ok(mailer)
}

fn startup_error(e: AppError) -> std::io::Error {
  tracing::error!(error = %e, "Server startup failed.");
  std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

// Main function
#[actix_web::main]
async fn main() -> std::io::Result<()> {
  tracing_subscriber::fmt()
    .with_max_level(Level::INFO) // Default level
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()) // Allow RUST_LOG override
    .with_span_events(FmtSpan::CLOSE) // Log when spans close, showing duration
    .init();

  tracing::info!("Starting song generation server...");

  let app_config = Arc::new(AppConfig::from_env().map_err(startup_error)?);
  let stores = Stores::connect(&app_config).await.map_err(startup_error)?;

  if app_config.seed_db {
    let order_id = stores.seed_demo_order().await.map_err(startup_error)?;
    tracing::info!(%order_id, "Seeded a paid demo order. POST /api/v1/orders/{}/fulfill to start it.", order_id);
  }

  let (jobs, orders) = stores.handles();
  let provider = build_provider(&app_config).map_err(startup_error)?;
  let mailer = build_mailer(&app_config).map_err(startup_error)?;
  let orchestrator = Arc::new(Orchestrator::start(
    provider,
    jobs,
    orders,
    mailer,
    app_config.orchestrator_settings(),
  ));

  // Jobs left generating by a previous process get their waiters back.
  match orchestrator.resume_polling().await {
    Ok(resumed) if resumed > 0 => tracing::info!(resumed, "Resumed polling for in-flight jobs."),
    Ok(_) => {}
    Err(e) => tracing::error!(error = %e, "Could not resume in-flight jobs."),
  }
  match orchestrator.resume_notifications().await {
    Ok(requeued) if requeued > 0 => tracing::info!(requeued, "Re-queued notifications left dispatching."),
    Ok(_) => {}
    Err(e) => tracing::error!(error = %e, "Could not re-queue pending notifications."),
  }

  let app_state = AppState {
    orchestrator: orchestrator.clone(),
    config: app_config.clone(),
  };

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Attempting to bind server to {}...", server_address);

  let served = HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone())) // Share AppState with handlers
      .wrap(tracing_actix_web::TracingLogger::default()) // Actix middleware for tracing requests
      .configure(web::configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await;

  orchestrator.shutdown().await;
  served
}
