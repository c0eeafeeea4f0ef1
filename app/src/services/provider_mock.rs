// songforge_app/src/services/provider_mock.rs

//! Stand-in provider for local development.
//!
//! Tracks "finish" after a fixed latency. When a callback URL is offered and
//! callbacks are enabled, the mock posts the result back to the server the way
//! the real provider would, signed with the webhook secret if one is set.
//! Only polled tasks are tracked, and each is forgotten once a finished
//! state has been reported for it.

use crate::services::signature;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use songforge::{ForgeError, ForgeResult, GenerationProvider, OrderItem, Submission, TaskState, TaskStatus};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MockTask {
  submitted_at: DateTime<Utc>,
  /// Items labelled with "fail" always fail, for exercising partial orders.
  fails: bool,
}

pub struct MockGenerationProvider {
  latency: Duration,
  accept_callbacks: bool,
  webhook_secret: Option<String>,
  client: reqwest::Client,
  tasks: Mutex<HashMap<String, MockTask>>,
}

impl MockGenerationProvider {
  pub fn new(latency: Duration, accept_callbacks: bool, webhook_secret: Option<String>) -> Self {
    Self {
      latency,
      accept_callbacks,
      webhook_secret,
      client: reqwest::Client::new(),
      tasks: Mutex::new(HashMap::new()),
    }
  }

  fn audio_url(task_id: &str) -> String {
    format!("https://mock-provider.local/audio/{}.mp3", task_id)
  }

  fn spawn_callback(&self, task_id: String, fails: bool, callback_url: String) {
    let client = self.client.clone();
    let latency = self.latency;
    let secret = self.webhook_secret.clone();
    tokio::spawn(async move {
      tokio::time::sleep(latency).await;
      let payload = if fails {
        json!({"taskId": task_id, "state": "GENERATE_AUDIO_FAILED", "error": "mock provider failure"})
      } else {
        json!({
          "taskId": task_id,
          "state": "SUCCESS",
          "audioUrl": Self::audio_url(&task_id),
          "imageUrl": format!("https://mock-provider.local/cover/{}.jpg", task_id),
        })
      };
      let body = payload.to_string();
      let mut request = client
        .post(&callback_url)
        .header(reqwest::header::CONTENT_TYPE, "application/json");
      if let Some(sig) = secret.as_deref().and_then(|secret| signature::sign(secret, body.as_bytes())) {
        request = request.header(signature::SIGNATURE_HEADER, sig);
      }
      match request.body(body).send().await {
        Ok(response) => info!(%task_id, status = %response.status(), "Mock provider delivered callback."),
        Err(e) => warn!(%task_id, error = %e, "Mock provider could not deliver callback."),
      }
    });
  }
}

#[async_trait]
impl GenerationProvider for MockGenerationProvider {
  #[instrument(name = "MockGenerationProvider::submit", skip(self, item, callback_url), fields(label = %item.label))]
  async fn submit(&self, item: &OrderItem, callback_url: Option<&str>) -> ForgeResult<Submission> {
    if item.lyrics.trim().is_empty() {
      return Err(ForgeError::provider("lyrics must not be empty"));
    }
    let task_id = format!("mock-{}", Uuid::new_v4().simple());
    let fails = item.label.to_lowercase().contains("fail");

    let callback_accepted = match callback_url {
      Some(url) if self.accept_callbacks => {
        self.spawn_callback(task_id.clone(), fails, url.to_string());
        true
      }
      _ => {
        self.tasks.lock().insert(
          task_id.clone(),
          MockTask {
            submitted_at: Utc::now(),
            fails,
          },
        );
        false
      }
    };
    Ok(Submission::from_response(vec![task_id], callback_accepted))
  }

  async fn status(&self, task_id: &str) -> ForgeResult<TaskStatus> {
    let task = self
      .tasks
      .lock()
      .get(task_id)
      .cloned()
      .ok_or_else(|| ForgeError::provider(format!("unknown task {}", task_id)))?;

    let elapsed = (Utc::now() - task.submitted_at).to_std().unwrap_or_default();
    let (state, audio_url) = if elapsed < self.latency {
      (TaskState::Running, None)
    } else if task.fails {
      (TaskState::Failed("mock provider failure".to_string()), None)
    } else {
      (TaskState::Succeeded, Some(Self::audio_url(task_id)))
    };
    if state.is_terminal() {
      self.tasks.lock().remove(task_id);
    }
    Ok(TaskStatus {
      task_id: task_id.to_string(),
      state,
      audio_url,
      image_url: None,
    })
  }
}
