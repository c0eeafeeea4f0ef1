// songforge/src/models/order_item.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One requested song. Read-only input to job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
  pub id: Uuid,
  pub order_id: Uuid,
  pub lyrics: String,
  pub style_tags: Vec<String>,
  /// Short title the provider attaches to the track.
  pub label: String,
  pub dedication: Option<String>,
  /// Language hint captured at checkout, e.g. "en" or "es".
  pub language: Option<String>,
  pub price_cents: i64,
}

impl OrderItem {
  pub fn new(order_id: Uuid, label: &str, lyrics: &str, style_tags: &[&str]) -> Self {
    Self {
      id: Uuid::new_v4(),
      order_id,
      lyrics: lyrics.to_string(),
      style_tags: style_tags.iter().map(|t| (*t).to_string()).collect(),
      label: label.to_string(),
      dedication: None,
      language: None,
      price_cents: 0,
    }
  }

  /// Style tags as the provider expects them: one comma-separated string.
  pub fn style(&self) -> String {
    self.style_tags.join(", ")
  }
}
