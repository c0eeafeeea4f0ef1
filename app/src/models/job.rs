// songforge_app/src/models/job.rs

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use songforge::{Artifact, FailureReason, GenerationJob, JobStatus, SubmissionMode};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
  pub id: Uuid,
  pub order_id: Uuid,
  pub order_item_id: Uuid,
  pub task_ids: Vec<String>,
  pub status: String,
  pub mode: Option<String>,
  pub audio_url: Option<String>,
  pub image_url: Option<String>,
  pub failure: Option<Json<FailureReason>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for GenerationJob {
  type Error = anyhow::Error;

  fn try_from(row: JobRow) -> Result<Self, Self::Error> {
    let status = JobStatus::parse(&row.status).ok_or_else(|| anyhow!("unknown job status '{}'", row.status))?;
    let mode = row
      .mode
      .as_deref()
      .map(|m| SubmissionMode::parse(m).ok_or_else(|| anyhow!("unknown submission mode '{}'", m)))
      .transpose()?;
    let image_url = row.image_url;
    Ok(GenerationJob {
      id: row.id,
      order_id: row.order_id,
      order_item_id: row.order_item_id,
      task_ids: row.task_ids,
      status,
      mode,
      artifact: row.audio_url.map(|audio_url| Artifact { audio_url, image_url }),
      failure: row.failure.map(|Json(reason)| reason),
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}
