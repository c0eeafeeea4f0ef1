// songforge_app/src/state.rs
use crate::config::AppConfig;
use songforge::Orchestrator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub orchestrator: Arc<Orchestrator>,
  pub config: Arc<AppConfig>, // Share loaded config
}
