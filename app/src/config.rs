// songforge_app/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use songforge::OrchestratorSettings;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// In-memory store when unset.
  pub database_url: Option<String>,
  /// Public base URL the provider calls back on.
  pub app_base_url: String,

  /// Mock provider when unset.
  pub provider_base_url: Option<String>,
  pub provider_api_key: Option<String>,
  pub provider_callbacks_enabled: bool,
  pub poll_interval: Duration,
  pub wait_budget: Duration,

  /// Shared secret for `X-Provider-Signature`; verification is off when unset.
  pub webhook_secret: Option<String>,

  pub mail_sender: String,
  /// Log-only mailer when unset.
  pub mail_api_url: Option<String>,
  pub mail_api_key: Option<String>,

  // Optional: for seeding demo orders on startup
  pub seed_db: bool,
}

fn optional(var_name: &str) -> Option<String> {
  env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(var_name: &str, default: T) -> Result<T>
where
  T::Err: std::fmt::Display,
{
  match optional(var_name) {
    Some(raw) => raw
      .trim()
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {} value '{}': {}", var_name, raw, e))),
    None => Ok(default),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok(); // Load .env file if present

    let server_host = optional("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let server_port = parse_or::<u16>("SERVER_PORT", 8080)?;
    let app_base_url = optional("APP_BASE_URL").unwrap_or_else(|| format!("http://{}:{}", server_host, server_port));

    let defaults = OrchestratorSettings::default();
    let poll_interval = Duration::from_secs(parse_or("POLL_INTERVAL_SECS", defaults.poll_interval.as_secs())?);
    let wait_budget = Duration::from_secs(parse_or("WAIT_BUDGET_SECS", defaults.wait_budget.as_secs())?);
    if poll_interval.is_zero() || wait_budget < poll_interval {
      return Err(AppError::Config(format!(
        "POLL_INTERVAL_SECS must be positive and not exceed WAIT_BUDGET_SECS (got {}s / {}s)",
        poll_interval.as_secs(),
        wait_budget.as_secs()
      )));
    }

    let config = Self {
      server_host,
      server_port,
      database_url: optional("DATABASE_URL"),
      app_base_url: app_base_url.trim_end_matches('/').to_string(),
      provider_base_url: optional("PROVIDER_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
      provider_api_key: optional("PROVIDER_API_KEY"),
      provider_callbacks_enabled: parse_or("PROVIDER_CALLBACKS_ENABLED", true)?,
      poll_interval,
      wait_budget,
      webhook_secret: optional("WEBHOOK_SECRET"),
      mail_sender: optional("MAIL_SENDER").unwrap_or_else(|| "songs@example.com".to_string()),
      mail_api_url: optional("MAIL_API_URL"),
      mail_api_key: optional("MAIL_API_KEY"),
      seed_db: parse_or("SEED_DB", false)?,
    };

    // Secrets stay out of the log.
    tracing::info!(
      database = config.database_url.is_some(),
      provider = config.provider_base_url.as_deref().unwrap_or("mock"),
      callbacks = config.provider_callbacks_enabled,
      signed_webhooks = config.webhook_secret.is_some(),
      mail_api = config.mail_api_url.is_some(),
      "Application configuration loaded successfully."
    );
    Ok(config)
  }

  pub fn callback_url(&self) -> String {
    format!("{}/api/v1/webhooks/provider-callback", self.app_base_url)
  }

  pub fn orchestrator_settings(&self) -> OrchestratorSettings {
    let settings = OrchestratorSettings::default().with_polling(self.poll_interval, self.wait_budget);
    if self.provider_callbacks_enabled {
      settings.with_callback_url(self.callback_url())
    } else {
      settings
    }
  }
}
