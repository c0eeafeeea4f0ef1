// songforge_app/src/services/pg_store.rs

//! Postgres-backed job and order stores.
//!
//! Every state transition is a single `UPDATE ... WHERE <prior state>`; the
//! affected-row count decides which concurrent caller won.

use crate::models::{JobRow, OrderItemRow, OrderRow};
use async_trait::async_trait;
use songforge::{
  ForgeError, ForgeResult, GenerationJob, JobOutcome, JobStore, NotificationStatus, Order, OrderItem, OrderStatus,
  OrderStore, SubmissionMode,
};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

const JOB_COLUMNS: &str =
  "id, order_id, order_item_id, task_ids, status, mode, audio_url, image_url, failure, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, customer_id, customer_email, payment_reference, total_amount_cents, currency, status, \
   notification_status, notification_message_id, notification_error, fan_out_started, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  /// Applies `schema.sql`. Every statement is idempotent.
  pub async fn migrate(&self) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(include_str!("../../schema.sql")).execute(&self.pool).await?;
    Ok(())
  }

  /// Inserts a paid order and its items in one transaction.
  pub async fn insert_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), sqlx::Error> {
    let mut tx = self.pool.begin().await?;
    sqlx::query(
      "INSERT INTO orders (id, customer_id, customer_email, payment_reference, total_amount_cents, currency, status, \
       notification_status, fan_out_started, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(order.id)
    .bind(order.customer_id)
    .bind(&order.customer_email)
    .bind(&order.payment_reference)
    .bind(order.total_amount_cents)
    .bind(&order.currency)
    .bind(order.status.as_str())
    .bind(order.notification_status.as_str())
    .bind(order.fan_out_started)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *tx)
    .await?;

    for (position, item) in items.iter().enumerate() {
      sqlx::query(
        "INSERT INTO order_items (id, order_id, position, lyrics, style_tags, label, dedication, language, price_cents) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
      )
      .bind(item.id)
      .bind(item.order_id)
      .bind(position as i32)
      .bind(&item.lyrics)
      .bind(&item.style_tags)
      .bind(&item.label)
      .bind(&item.dedication)
      .bind(&item.language)
      .bind(item.price_cents)
      .execute(&mut *tx)
      .await?;
    }
    tx.commit().await
  }

  async fn order_exists(&self, order_id: Uuid) -> ForgeResult<bool> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
      .bind(order_id)
      .fetch_one(&self.pool)
      .await
      .map_err(|e| ForgeError::store("order_exists", e))
  }

  async fn job_exists(&self, job_id: Uuid) -> ForgeResult<bool> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM generation_jobs WHERE id = $1)")
      .bind(job_id)
      .fetch_one(&self.pool)
      .await
      .map_err(|e| ForgeError::store("job_exists", e))
  }

  /// Maps a zero-row conditional update to `false`, or to `NotFound` when the
  /// row does not exist at all.
  async fn order_transition(&self, order_id: Uuid, rows_affected: u64) -> ForgeResult<bool> {
    if rows_affected > 0 {
      return Ok(true);
    }
    if self.order_exists(order_id).await? {
      Ok(false)
    } else {
      Err(ForgeError::not_found("order", order_id))
    }
  }

  async fn job_transition(&self, job_id: Uuid, rows_affected: u64) -> ForgeResult<bool> {
    if rows_affected > 0 {
      return Ok(true);
    }
    if self.job_exists(job_id).await? {
      Ok(false)
    } else {
      Err(ForgeError::not_found("job", job_id))
    }
  }
}

fn to_job(row: JobRow) -> ForgeResult<GenerationJob> {
  GenerationJob::try_from(row).map_err(|e| ForgeError::store("decode_job", e))
}

#[async_trait]
impl JobStore for PgStore {
  async fn create_job(&self, order_id: Uuid, order_item_id: Uuid) -> ForgeResult<GenerationJob> {
    let job = GenerationJob::new(order_id, order_item_id);
    sqlx::query(
      "INSERT INTO generation_jobs (id, order_id, order_item_id, status, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (order_item_id) DO NOTHING",
    )
    .bind(job.id)
    .bind(job.order_id)
    .bind(job.order_item_id)
    .bind(job.status.as_str())
    .bind(job.created_at)
    .bind(job.updated_at)
    .execute(&self.pool)
    .await
    .map_err(|e| ForgeError::store("create_job", e))?;

    // Either the row just inserted or the one an earlier trigger created.
    let row: JobRow = sqlx::query_as(&format!(
      "SELECT {} FROM generation_jobs WHERE order_item_id = $1",
      JOB_COLUMNS
    ))
    .bind(order_item_id)
    .fetch_one(&self.pool)
    .await
    .map_err(|e| ForgeError::store("create_job", e))?;
    to_job(row)
  }

  async fn record_submission(&self, job_id: Uuid, task_ids: &[String], mode: SubmissionMode) -> ForgeResult<bool> {
    let result = sqlx::query(
      "UPDATE generation_jobs SET task_ids = $2, mode = $3, updated_at = NOW() \
       WHERE id = $1 AND status = 'generating' AND mode IS NULL",
    )
    .bind(job_id)
    .bind(task_ids)
    .bind(mode.as_str())
    .execute(&self.pool)
    .await
    .map_err(|e| ForgeError::store("record_submission", e))?;
    self.job_transition(job_id, result.rows_affected()).await
  }

  #[instrument(skip(self, outcome), fields(status = outcome.status().as_str()))]
  async fn try_terminalize(&self, job_id: Uuid, outcome: JobOutcome) -> ForgeResult<bool> {
    let status = outcome.status();
    let (artifact, failure) = match outcome {
      JobOutcome::Completed(artifact) => (Some(artifact), None),
      JobOutcome::Failed(reason) => (None, Some(Json(reason))),
    };
    let result = sqlx::query(
      "UPDATE generation_jobs SET status = $2, audio_url = $3, image_url = $4, failure = $5, updated_at = NOW() \
       WHERE id = $1 AND status = 'generating'",
    )
    .bind(job_id)
    .bind(status.as_str())
    .bind(artifact.as_ref().map(|a| a.audio_url.clone()))
    .bind(artifact.and_then(|a| a.image_url))
    .bind(failure)
    .execute(&self.pool)
    .await
    .map_err(|e| ForgeError::store("try_terminalize", e))?;

    let applied = self.job_transition(job_id, result.rows_affected()).await?;
    if !applied {
      debug!("Job already terminal; update ignored.");
    }
    Ok(applied)
  }

  async fn get_job(&self, job_id: Uuid) -> ForgeResult<GenerationJob> {
    let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {} FROM generation_jobs WHERE id = $1", JOB_COLUMNS))
      .bind(job_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| ForgeError::store("get_job", e))?;
    row.map(to_job).unwrap_or_else(|| Err(ForgeError::not_found("job", job_id)))
  }

  async fn find_by_task_id(&self, task_id: &str) -> ForgeResult<Option<GenerationJob>> {
    let row: Option<JobRow> = sqlx::query_as(&format!(
      "SELECT {} FROM generation_jobs WHERE task_ids @> ARRAY[$1]::TEXT[] LIMIT 1",
      JOB_COLUMNS
    ))
    .bind(task_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(|e| ForgeError::store("find_by_task_id", e))?;
    row.map(to_job).transpose()
  }

  async fn jobs_for_order(&self, order_id: Uuid) -> ForgeResult<Vec<GenerationJob>> {
    let rows: Vec<JobRow> = sqlx::query_as(&format!(
      "SELECT {} FROM generation_jobs WHERE order_id = $1 ORDER BY created_at, id",
      JOB_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&self.pool)
    .await
    .map_err(|e| ForgeError::store("jobs_for_order", e))?;
    rows.into_iter().map(to_job).collect()
  }

  async fn pending_polling_jobs(&self) -> ForgeResult<Vec<GenerationJob>> {
    let rows: Vec<JobRow> = sqlx::query_as(&format!(
      "SELECT {} FROM generation_jobs WHERE status = 'generating' AND mode = 'polling'",
      JOB_COLUMNS
    ))
    .fetch_all(&self.pool)
    .await
    .map_err(|e| ForgeError::store("pending_polling_jobs", e))?;
    rows.into_iter().map(to_job).collect()
  }
}

#[async_trait]
impl OrderStore for PgStore {
  async fn get_order(&self, order_id: Uuid) -> ForgeResult<Order> {
    let row: Option<OrderRow> = sqlx::query_as(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
      .bind(order_id)
      .fetch_optional(&self.pool)
      .await
      .map_err(|e| ForgeError::store("get_order", e))?;
    let row = row.ok_or_else(|| ForgeError::not_found("order", order_id))?;
    Order::try_from(row).map_err(|e| ForgeError::store("decode_order", e))
  }

  async fn order_items(&self, order_id: Uuid) -> ForgeResult<Vec<OrderItem>> {
    if !self.order_exists(order_id).await? {
      return Err(ForgeError::not_found("order", order_id));
    }
    let rows: Vec<OrderItemRow> = sqlx::query_as(
      "SELECT id, order_id, lyrics, style_tags, label, dedication, language, price_cents \
       FROM order_items WHERE order_id = $1 ORDER BY position, id",
    )
    .bind(order_id)
    .fetch_all(&self.pool)
    .await
    .map_err(|e| ForgeError::store("order_items", e))?;
    Ok(rows.into_iter().map(OrderItem::from).collect())
  }

  async fn begin_fan_out(&self, order_id: Uuid) -> ForgeResult<bool> {
    let result = sqlx::query(
      "UPDATE orders SET fan_out_started = TRUE, updated_at = NOW() WHERE id = $1 AND fan_out_started = FALSE",
    )
    .bind(order_id)
    .execute(&self.pool)
    .await
    .map_err(|e| ForgeError::store("begin_fan_out", e))?;
    self.order_transition(order_id, result.rows_affected()).await
  }

  async fn claim_settlement(&self, order_id: Uuid, status: OrderStatus) -> ForgeResult<bool> {
    let result = sqlx::query(
      "UPDATE orders SET notification_status = 'dispatching', status = $2, updated_at = NOW() \
       WHERE id = $1 AND notification_status = 'pending'",
    )
    .bind(order_id)
    .bind(status.as_str())
    .execute(&self.pool)
    .await
    .map_err(|e| ForgeError::store("claim_settlement", e))?;
    self.order_transition(order_id, result.rows_affected()).await
  }

  async fn claim_notification_retry(&self, order_id: Uuid) -> ForgeResult<bool> {
    let result = sqlx::query(
      "UPDATE orders SET notification_status = 'dispatching', updated_at = NOW() \
       WHERE id = $1 AND notification_status = 'failed'",
    )
    .bind(order_id)
    .execute(&self.pool)
    .await
    .map_err(|e| ForgeError::store("claim_notification_retry", e))?;
    self.order_transition(order_id, result.rows_affected()).await
  }

  async fn record_notification(
    &self,
    order_id: Uuid,
    status: NotificationStatus,
    message_id: Option<&str>,
    error: Option<&str>,
  ) -> ForgeResult<()> {
    let result = sqlx::query(
      "UPDATE orders SET notification_status = $2, notification_message_id = $3, notification_error = $4, \
       updated_at = NOW() WHERE id = $1",
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(message_id)
    .bind(error)
    .execute(&self.pool)
    .await
    .map_err(|e| ForgeError::store("record_notification", e))?;
    if result.rows_affected() == 0 {
      return Err(ForgeError::not_found("order", order_id));
    }
    Ok(())
  }

  async fn unnotified_orders(&self) -> ForgeResult<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM orders WHERE notification_status = 'failed' ORDER BY updated_at")
      .fetch_all(&self.pool)
      .await
      .map_err(|e| ForgeError::store("unnotified_orders", e))
  }

  async fn dispatching_orders(&self) -> ForgeResult<Vec<Uuid>> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM orders WHERE notification_status = 'dispatching' ORDER BY updated_at")
      .fetch_all(&self.pool)
      .await
      .map_err(|e| ForgeError::store("dispatching_orders", e))
  }
}
