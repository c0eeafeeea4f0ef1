// songforge_app/src/services/provider_client.rs

//! HTTP client for the song-generation provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use songforge::{ForgeError, ForgeResult, GenerationProvider, OrderItem, Submission, TaskState, TaskStatus};
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
  text: &'a str,
  style: String,
  label: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  callback_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
  #[serde(default)]
  task_ids: Vec<String>,
  #[serde(default)]
  callback_accepted: bool,
}

/// Task status as the provider reports it, both from `GET /tasks/{id}` and
/// in callback bodies.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTaskStatus {
  #[serde(default)]
  pub task_id: Option<String>,
  pub state: String,
  pub audio_url: Option<String>,
  pub image_url: Option<String>,
  pub error: Option<String>,
}

impl WireTaskStatus {
  pub fn into_status(self, task_id: &str) -> ForgeResult<TaskStatus> {
    let state = TaskState::from_wire(&self.state, self.error.as_deref())
      .ok_or_else(|| ForgeError::provider(format!("unrecognized task state '{}'", self.state)))?;
    Ok(TaskStatus {
      task_id: task_id.to_string(),
      state,
      audio_url: self.audio_url,
      image_url: self.image_url,
    })
  }
}

pub struct HttpGenerationProvider {
  client: reqwest::Client,
  base_url: String,
  api_key: Option<String>,
}

impl HttpGenerationProvider {
  pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> ForgeResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| ForgeError::provider(format!("could not build HTTP client: {}", e)))?;
    Ok(Self {
      client,
      base_url: base_url.into(),
      api_key,
    })
  }

  fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.api_key {
      Some(key) => request.bearer_auth(key),
      None => request,
    }
  }
}

async fn read_error(response: reqwest::Response) -> ForgeError {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  ForgeError::provider(format!("provider returned {}: {}", status, body.trim()))
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
  #[instrument(name = "HttpGenerationProvider::submit", skip(self, item, callback_url), fields(order_item_id = %item.id))]
  async fn submit(&self, item: &OrderItem, callback_url: Option<&str>) -> ForgeResult<Submission> {
    let body = GenerateRequest {
      text: &item.lyrics,
      style: item.style(),
      label: &item.label,
      callback_url,
    };
    let response = self
      .authorized(self.client.post(format!("{}/generate", self.base_url)))
      .json(&body)
      .send()
      .await
      .map_err(|e| ForgeError::provider(format!("submit request failed: {}", e)))?;

    if !response.status().is_success() {
      return Err(read_error(response).await);
    }
    let parsed: GenerateResponse = response
      .json()
      .await
      .map_err(|e| ForgeError::provider(format!("malformed submit response: {}", e)))?;

    if callback_url.is_some() && !parsed.callback_accepted {
      warn!("Provider declined the callback URL; job falls back to polling.");
    }
    debug!(tasks = parsed.task_ids.len(), callback_accepted = parsed.callback_accepted, "Submission accepted.");
    Ok(Submission::from_response(
      parsed.task_ids,
      parsed.callback_accepted && callback_url.is_some(),
    ))
  }

  #[instrument(name = "HttpGenerationProvider::status", skip(self))]
  async fn status(&self, task_id: &str) -> ForgeResult<TaskStatus> {
    let response = self
      .authorized(self.client.get(format!("{}/tasks/{}", self.base_url, task_id)))
      .send()
      .await
      .map_err(|e| ForgeError::provider(format!("status request failed: {}", e)))?;

    if !response.status().is_success() {
      return Err(read_error(response).await);
    }
    let wire: WireTaskStatus = response
      .json()
      .await
      .map_err(|e| ForgeError::provider(format!("malformed status response: {}", e)))?;
    wire.into_status(task_id)
  }
}
