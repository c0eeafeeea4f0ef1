// songforge/src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  Processing,
  Fulfilled,
  PartiallyFulfilled,
  Failed,
}

impl OrderStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      OrderStatus::Processing => "processing",
      OrderStatus::Fulfilled => "fulfilled",
      OrderStatus::PartiallyFulfilled => "partially_fulfilled",
      OrderStatus::Failed => "failed",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "processing" => Some(OrderStatus::Processing),
      "fulfilled" => Some(OrderStatus::Fulfilled),
      "partially_fulfilled" => Some(OrderStatus::PartiallyFulfilled),
      "failed" => Some(OrderStatus::Failed),
      _ => None,
    }
  }

  pub fn is_settled(&self) -> bool {
    !matches!(self, OrderStatus::Processing)
  }
}

/// Customer notification lifecycle of an order.
///
/// `Pending -> Dispatching` is claimed exactly once by the settlement check.
/// `Failed -> Dispatching` is only claimed by an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
  Pending,
  Dispatching,
  Sent,
  Failed,
}

impl NotificationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      NotificationStatus::Pending => "pending",
      NotificationStatus::Dispatching => "dispatching",
      NotificationStatus::Sent => "sent",
      NotificationStatus::Failed => "failed",
    }
  }

  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "pending" => Some(NotificationStatus::Pending),
      "dispatching" => Some(NotificationStatus::Dispatching),
      "sent" => Some(NotificationStatus::Sent),
      "failed" => Some(NotificationStatus::Failed),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
  pub id: Uuid,
  pub customer_id: Uuid,
  pub customer_email: String,
  /// Set once payment is captured. Fan-out refuses orders without it.
  pub payment_reference: Option<String>,
  pub total_amount_cents: i64,
  pub currency: String,
  pub status: OrderStatus,
  pub notification_status: NotificationStatus,
  pub notification_message_id: Option<String>,
  pub notification_error: Option<String>,
  pub fan_out_started: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  /// A paid order that has not been fanned out or settled yet.
  pub fn new_paid(customer_id: Uuid, customer_email: &str, payment_reference: &str, total_amount_cents: i64) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      customer_id,
      customer_email: customer_email.to_string(),
      payment_reference: Some(payment_reference.to_string()),
      total_amount_cents,
      currency: "usd".to_string(),
      status: OrderStatus::Processing,
      notification_status: NotificationStatus::Pending,
      notification_message_id: None,
      notification_error: None,
      fan_out_started: false,
      created_at: now,
      updated_at: now,
    }
  }
}
