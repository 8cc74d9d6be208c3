//! Push notifications and notification clicks.
//!
//! Display and window management belong to the host; this module only
//! builds the notification and decides which window to bring up.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::NotificationConfig;

/// Payload of a push message. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub url: Option<String>,
}

impl PushPayload {
  /// Parse push data; `null` is an empty payload.
  pub fn parse(data: &Value) -> Result<Self> {
    if data.is_null() {
      return Ok(Self::default());
    }
    serde_json::from_value(data.clone()).map_err(|e| eyre!("Invalid push payload: {}", e))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Page to open when the notification is clicked
  pub url: String,
}

impl Notification {
  pub fn from_push(payload: PushPayload, config: &NotificationConfig) -> Self {
    Self {
      title: payload.title.unwrap_or_else(|| config.default_title.clone()),
      body: payload.body.unwrap_or_else(|| config.default_body.clone()),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      url: payload.url.unwrap_or_else(|| "/".to_string()),
    }
  }
}

/// Shows notifications. Fire-and-forget.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: String,
}

/// Windows controlled by the worker.
#[async_trait]
pub trait WindowClients: Send + Sync {
  async fn windows(&self) -> Result<Vec<WindowClient>>;

  async fn focus(&self, id: &str) -> Result<()>;

  async fn open_window(&self, url: &str) -> Result<WindowClient>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClickAction {
  Focused { id: String },
  Opened { id: String },
}

/// Focus a window already showing `url`, or open a new one.
pub async fn handle_click(clients: &dyn WindowClients, url: &str) -> Result<ClickAction> {
  let windows = clients.windows().await?;
  if let Some(window) = windows.into_iter().find(|w| w.url == url) {
    clients.focus(&window.id).await?;
    return Ok(ClickAction::Focused { id: window.id });
  }

  let window = clients.open_window(url).await?;
  Ok(ClickAction::Opened { id: window.id })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;

  #[derive(Default)]
  struct Windows {
    open: Mutex<Vec<WindowClient>>,
    focused: Mutex<Vec<String>>,
  }

  #[async_trait]
  impl WindowClients for Windows {
    async fn windows(&self) -> Result<Vec<WindowClient>> {
      Ok(self.open.lock().unwrap().clone())
    }

    async fn focus(&self, id: &str) -> Result<()> {
      self.focused.lock().unwrap().push(id.to_string());
      Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<WindowClient> {
      let mut open = self.open.lock().unwrap();
      let window = WindowClient {
        id: format!("w{}", open.len() + 1),
        url: url.to_string(),
      };
      open.push(window.clone());
      Ok(window)
    }
  }

  #[test]
  fn test_push_defaults() {
    let payload = PushPayload::parse(&json!({})).unwrap();
    let notification = Notification::from_push(payload, &NotificationConfig::default());

    assert_eq!(notification.title, "Update");
    assert_eq!(notification.body, "An update is available!");
    assert_eq!(notification.icon, "/apple-touch-icon.png");
    assert_eq!(notification.badge, "/favicon-32x32.png");
    assert_eq!(notification.url, "/");
  }

  #[test]
  fn test_push_fields_override_defaults() {
    let payload = PushPayload::parse(&json!({
      "title": "New rates",
      "body": "Rates changed today",
      "url": "/rates"
    }))
    .unwrap();
    let notification = Notification::from_push(payload, &NotificationConfig::default());

    assert_eq!(notification.title, "New rates");
    assert_eq!(notification.body, "Rates changed today");
    assert_eq!(notification.url, "/rates");
  }

  #[test]
  fn test_invalid_push_payload() {
    assert!(PushPayload::parse(&json!("just text")).is_err());
    assert!(PushPayload::parse(&Value::Null).is_ok());
  }

  #[tokio::test]
  async fn test_click_opens_then_focuses() {
    let windows = Windows::default();

    let first = handle_click(&windows, "/rates").await.unwrap();
    assert_eq!(first, ClickAction::Opened { id: "w1".into() });

    let second = handle_click(&windows, "/rates").await.unwrap();
    assert_eq!(second, ClickAction::Focused { id: "w1".into() });
    assert_eq!(*windows.focused.lock().unwrap(), vec!["w1"]);

    let other = handle_click(&windows, "/").await.unwrap();
    assert_eq!(other, ClickAction::Opened { id: "w2".into() });
  }
}
