use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::net::Method;

/// Triggering events, one JSON object per line on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
  Install,
  Activate,
  /// The previous version let go of its clients
  Release,
  Fetch {
    url: String,
    #[serde(default)]
    method: Method,
    #[serde(default)]
    headers: BTreeMap<String, String>,
  },
  /// Control message posted by a page
  Message {
    #[serde(default)]
    data: Value,
  },
  /// Background sync signal
  Sync { tag: String },
  Push {
    #[serde(default)]
    data: Value,
  },
  #[serde(rename = "notificationclick")]
  NotificationClick { url: String },
}

impl Event {
  /// Lifecycle events must run alone, after everything before them.
  pub fn is_lifecycle(&self) -> bool {
    matches!(self, Event::Install | Event::Activate | Event::Release)
  }

  pub fn name(&self) -> &'static str {
    match self {
      Event::Install => "install",
      Event::Activate => "activate",
      Event::Release => "release",
      Event::Fetch { .. } => "fetch",
      Event::Message { .. } => "message",
      Event::Sync { .. } => "sync",
      Event::Push { .. } => "push",
      Event::NotificationClick { .. } => "notificationclick",
    }
  }

  pub fn parse(line: &str) -> Result<Self> {
    serde_json::from_str(line).map_err(|e| eyre!("Invalid event {:?}: {}", line, e))
  }
}

/// Event handler that produces events from newline-delimited JSON input
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Result<Event>>,
}

impl EventHandler {
  /// Spawn a reader over `input`. Blank lines are skipped; malformed lines
  /// are delivered as errors without stopping the stream.
  pub fn new<R>(input: R) -> Self
  where
    R: AsyncBufRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = input.lines();
      loop {
        let next = match lines.next_line().await {
          Ok(Some(line)) if line.trim().is_empty() => continue,
          Ok(Some(line)) => Event::parse(line.trim()),
          Ok(None) => break,
          Err(e) => {
            // The input is unusable past a read error
            let _ = tx.send(Err(eyre!("Failed to read event: {}", e)));
            break;
          }
        };
        if tx.send(next).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Result<Event>> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_events() {
    assert_eq!(Event::parse(r#"{"type":"install"}"#).unwrap(), Event::Install);
    assert_eq!(
      Event::parse(r#"{"type":"sync","tag":"refresh-content"}"#).unwrap(),
      Event::Sync {
        tag: "refresh-content".to_string()
      }
    );
    assert_eq!(
      Event::parse(r#"{"type":"message","data":{"type":"SKIP_WAITING"}}"#).unwrap(),
      Event::Message {
        data: json!({"type": "SKIP_WAITING"})
      }
    );
    assert_eq!(
      Event::parse(r#"{"type":"notificationclick","url":"/"}"#).unwrap(),
      Event::NotificationClick {
        url: "/".to_string()
      }
    );
  }

  #[test]
  fn test_fetch_defaults_to_get() {
    let event = Event::parse(r#"{"type":"fetch","url":"https://example.com/"}"#).unwrap();
    assert_eq!(
      event,
      Event::Fetch {
        url: "https://example.com/".to_string(),
        method: Method::Get,
        headers: BTreeMap::new(),
      }
    );

    let post = Event::parse(r#"{"type":"fetch","url":"https://example.com/","method":"post"}"#)
      .unwrap();
    assert!(matches!(post, Event::Fetch { method: Method::Post, .. }));
  }

  #[test]
  fn test_parse_rejects_unknown() {
    assert!(Event::parse(r#"{"type":"explode"}"#).is_err());
    assert!(Event::parse("not json").is_err());
    assert!(Event::parse(r#"{"type":"fetch","url":"/","method":"BREW"}"#).is_err());
  }

  #[test]
  fn test_lifecycle_events() {
    assert!(Event::Install.is_lifecycle());
    assert_eq!(Event::parse(r#"{"type":"release"}"#).unwrap(), Event::Release);
    assert!(Event::Release.is_lifecycle());
    assert!(!Event::Sync { tag: "x".into() }.is_lifecycle());
  }

  #[tokio::test]
  async fn test_handler_streams_lines() {
    let input: &'static [u8] =
      b"{\"type\":\"install\"}\n\n garbage \n{\"type\":\"activate\"}\n";
    let mut events = EventHandler::new(input);

    assert_eq!(events.next().await.unwrap().unwrap(), Event::Install);
    assert!(events.next().await.unwrap().is_err());
    assert_eq!(events.next().await.unwrap().unwrap(), Event::Activate);
    assert!(events.next().await.is_none());
  }
}
