// songforge_app/src/services/mailer.rs

//! Customer email delivery behind `NotificationTransport`.

use async_trait::async_trait;
use serde::Serialize;
use songforge::{CustomerNotification, DeliveryReceipt, ForgeError, ForgeResult, NotificationKind, NotificationTransport};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
  pub subject: String,
  pub body: String,
}

fn greeting(language: Option<&str>) -> &'static str {
  match language {
    Some("es") => "Hola",
    Some("pt") => "Olá",
    Some("de") => "Hallo",
    Some("fr") => "Bonjour",
    _ => "Hello",
  }
}

pub fn render(notification: &CustomerNotification) -> RenderedEmail {
  let hello = greeting(notification.language.as_deref());
  match &notification.kind {
    NotificationKind::Ready { tracks, failed_count } => {
      let mut body = format!("{},\n\nYour songs are ready:\n\n", hello);
      for track in tracks {
        body.push_str(&format!("  {} - {}\n", track.label, track.audio_url));
      }
      if *failed_count > 0 {
        body.push_str(&format!(
          "\n{} of your songs could not be generated. Our team will reach out about them.\n",
          failed_count
        ));
      }
      RenderedEmail {
        subject: if tracks.len() == 1 {
          "Your song is ready".to_string()
        } else {
          format!("Your {} songs are ready", tracks.len())
        },
        body,
      }
    }
    NotificationKind::GenerationFailed { failed_count } => RenderedEmail {
      subject: "We could not generate your songs".to_string(),
      body: format!(
        "{},\n\nUnfortunately none of the {} songs in your order could be generated. Our team will reach out shortly.\n",
        hello, failed_count
      ),
    },
  }
}

/// Writes the email to the log instead of sending it.
pub struct LogMailer {
  sender: String,
}

impl LogMailer {
  pub fn new(sender: impl Into<String>) -> Self {
    Self { sender: sender.into() }
  }
}

#[async_trait]
impl NotificationTransport for LogMailer {
  #[instrument(name = "LogMailer::send", skip(self, notification), fields(order_id = %notification.order_id))]
  async fn send(&self, notification: &CustomerNotification) -> ForgeResult<DeliveryReceipt> {
    let email = render(notification);
    let message_id = format!("log_email_{}", Uuid::new_v4());
    info!(
      to = %notification.recipient,
      from = %self.sender,
      subject = %email.subject,
      %message_id,
      "Email logged instead of sent.\n{}",
      email.body
    );
    Ok(DeliveryReceipt { message_id })
  }
}

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
  from: &'a str,
  to: &'a str,
  subject: &'a str,
  text: &'a str,
}

/// Posts the email to a transactional mail API.
pub struct HttpMailer {
  client: reqwest::Client,
  api_url: String,
  api_key: Option<String>,
  sender: String,
}

impl HttpMailer {
  pub fn new(api_url: impl Into<String>, api_key: Option<String>, sender: impl Into<String>) -> ForgeResult<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(15))
      .build()
      .map_err(|e| ForgeError::transport(format!("could not build HTTP client: {}", e)))?;
    Ok(Self {
      client,
      api_url: api_url.into(),
      api_key,
      sender: sender.into(),
    })
  }
}

#[derive(Debug, serde::Deserialize)]
struct MailResponse {
  #[serde(default, alias = "messageId")]
  id: Option<String>,
}

#[async_trait]
impl NotificationTransport for HttpMailer {
  #[instrument(name = "HttpMailer::send", skip(self, notification), fields(order_id = %notification.order_id))]
  async fn send(&self, notification: &CustomerNotification) -> ForgeResult<DeliveryReceipt> {
    let email = render(notification);
    let payload = MailRequest {
      from: &self.sender,
      to: &notification.recipient,
      subject: &email.subject,
      text: &email.body,
    };
    let mut request = self.client.post(&self.api_url).json(&payload);
    if let Some(key) = &self.api_key {
      request = request.bearer_auth(key);
    }
    let response = request
      .send()
      .await
      .map_err(|e| ForgeError::transport(format!("mail request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ForgeError::transport(format!("mail API returned {}: {}", status, body.trim())));
    }
    let parsed: MailResponse = response.json().await.unwrap_or(MailResponse { id: None });
    let message_id = parsed.id.unwrap_or_else(|| format!("mail_{}", Uuid::new_v4()));
    info!(%message_id, "Email accepted by mail API.");
    Ok(DeliveryReceipt { message_id })
  }
}
