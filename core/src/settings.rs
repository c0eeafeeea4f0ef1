// songforge/src/settings.rs

use std::time::Duration;

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
  /// Delay between two status polls of the same job.
  pub poll_interval: Duration,
  /// Ceiling on how long a single polling-mode job may stay generating.
  pub wait_budget: Duration,
  /// Offered to the provider on every submission. `None` forces polling mode.
  pub callback_url: Option<String>,
}

impl Default for OrchestratorSettings {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_secs(10),
      wait_budget: Duration::from_secs(300),
      callback_url: None,
    }
  }
}

impl OrchestratorSettings {
  pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
    self.callback_url = Some(url.into());
    self
  }

  pub fn with_polling(mut self, poll_interval: Duration, wait_budget: Duration) -> Self {
    self.poll_interval = poll_interval;
    self.wait_budget = wait_budget;
    self
  }
}
