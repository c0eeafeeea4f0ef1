// songforge_app/src/models/order.rs

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use songforge::{NotificationStatus, Order, OrderItem, OrderStatus};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
  pub id: Uuid,
  pub customer_id: Uuid,
  pub customer_email: String,
  pub payment_reference: Option<String>,
  pub total_amount_cents: i64,
  pub currency: String,
  pub status: String,
  pub notification_status: String,
  pub notification_message_id: Option<String>,
  pub notification_error: Option<String>,
  pub fan_out_started: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
  type Error = anyhow::Error;

  fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
    let status = OrderStatus::parse(&row.status).ok_or_else(|| anyhow!("unknown order status '{}'", row.status))?;
    let notification_status = NotificationStatus::parse(&row.notification_status)
      .ok_or_else(|| anyhow!("unknown notification status '{}'", row.notification_status))?;
    Ok(Order {
      id: row.id,
      customer_id: row.customer_id,
      customer_email: row.customer_email,
      payment_reference: row.payment_reference,
      total_amount_cents: row.total_amount_cents,
      currency: row.currency,
      status,
      notification_status,
      notification_message_id: row.notification_message_id,
      notification_error: row.notification_error,
      fan_out_started: row.fan_out_started,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderItemRow {
  pub id: Uuid,
  pub order_id: Uuid,
  pub lyrics: String,
  pub style_tags: Vec<String>,
  pub label: String,
  pub dedication: Option<String>,
  pub language: Option<String>,
  pub price_cents: i64,
}

impl From<OrderItemRow> for OrderItem {
  fn from(row: OrderItemRow) -> Self {
    OrderItem {
      id: row.id,
      order_id: row.order_id,
      lyrics: row.lyrics,
      style_tags: row.style_tags,
      label: row.label,
      dedication: row.dedication,
      language: row.language,
      price_cents: row.price_cents,
    }
  }
}
