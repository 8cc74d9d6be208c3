//! Host that feeds events to the worker and reports their outcomes.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::Result;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cache::CacheStorage;
use crate::event::{Event, EventHandler};
use crate::worker::{Dispatched, Notification, Notifier, Outcome, WindowClient, WindowClients, Worker};

/// Main application state
pub struct App<S: CacheStorage> {
  worker: Arc<Worker<S>>,
  /// One JSON report per handled event
  output: mpsc::UnboundedSender<Value>,
  /// Concurrent fetch, message, sync and push events
  in_flight: JoinSet<()>,
}

impl<S: CacheStorage + 'static> App<S> {
  pub fn new(worker: Worker<S>, output: mpsc::UnboundedSender<Value>) -> Self {
    Self {
      worker: Arc::new(worker),
      output,
      in_flight: JoinSet::new(),
    }
  }

  /// Process events until the input ends.
  ///
  /// Lifecycle events wait for every earlier event and run alone;
  /// everything else runs concurrently.
  pub async fn run(&mut self, mut events: EventHandler) -> Result<()> {
    while let Some(next) = events.next().await {
      let event = match next {
        Ok(event) => event,
        Err(e) => {
          warn!(error = %e, "skipping invalid event");
          let _ = self
            .output
            .send(json!({ "event": "invalid", "ok": false, "error": e.to_string() }));
          continue;
        }
      };

      let task = handle(Arc::clone(&self.worker), event.clone(), self.output.clone());
      if event.is_lifecycle() {
        self.drain().await;
        task.await;
      } else {
        self.in_flight.spawn(task);
      }
    }

    self.drain().await;
    Ok(())
  }

  async fn drain(&mut self) {
    while let Some(joined) = self.in_flight.join_next().await {
      if let Err(e) = joined {
        warn!(error = %e, "event task did not complete");
      }
    }
  }
}

/// Dispatch one event, report it, then settle its side effects.
async fn handle<S: CacheStorage + 'static>(
  worker: Arc<Worker<S>>,
  event: Event,
  output: mpsc::UnboundedSender<Value>,
) {
  let name = event.name();
  let lifecycle = event.is_lifecycle();
  match worker.dispatch(event).await {
    Ok(Dispatched { outcome, tasks }) => {
      let mut report = report(name, &outcome);
      if lifecycle {
        report["state"] = json!(worker.state());
      }
      let _ = output.send(report);
      if tasks.settle().await > 0 {
        warn!(event = name, "some side effects failed");
      }
    }
    Err(e) => {
      warn!(event = name, error = %e, "event failed");
      let mut report = json!({ "event": name, "ok": false, "error": e.to_string() });
      if lifecycle {
        report["state"] = json!(worker.state());
      }
      let _ = output.send(report);
    }
  }
}

fn report(event: &str, outcome: &Outcome) -> Value {
  match outcome {
    Outcome::Installed { cached } => json!({ "event": event, "ok": true, "cached": cached }),
    Outcome::Activated { deleted } => json!({ "event": event, "ok": true, "deleted": deleted }),
    Outcome::Released => json!({ "event": event, "ok": true }),
    Outcome::Response { class, result } => {
      let mut report = json!({
        "event": event,
        "ok": true,
        "class": class,
        "source": result.source,
        "status": result.response.status,
        "status_text": result.response.status_text,
        "headers": result.response.headers,
        "body_len": result.response.body.len(),
      });
      // Text bodies stay readable; anything else is sent byte-exact
      match std::str::from_utf8(&result.response.body) {
        Ok(text) => report["body"] = json!(text),
        Err(_) => report["body_base64"] = json!(STANDARD.encode(&result.response.body)),
      }
      report
    }
    Outcome::Message { message } => json!({ "event": event, "ok": true, "message": message }),
    Outcome::Synced { tag, purged } => {
      json!({ "event": event, "ok": true, "tag": tag, "purged": purged })
    }
    Outcome::Notified { notification } => {
      json!({ "event": event, "ok": true, "notification": notification })
    }
    Outcome::Clicked { action } => json!({ "event": event, "ok": true, "click": action }),
  }
}

/// Notifier for a headless host: notifications go to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) {
    info!(
      title = %notification.title,
      body = %notification.body,
      url = %notification.url,
      "notification"
    );
  }
}

/// Window registry for a headless host. Opening a window records it so a
/// later click on the same URL focuses it.
#[derive(Debug, Default)]
pub struct HeadlessWindows {
  open: Mutex<Vec<WindowClient>>,
}

#[async_trait]
impl WindowClients for HeadlessWindows {
  async fn windows(&self) -> Result<Vec<WindowClient>> {
    Ok(self.open.lock().unwrap_or_else(PoisonError::into_inner).clone())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    info!(id, "focus window");
    Ok(())
  }

  async fn open_window(&self, url: &str) -> Result<WindowClient> {
    let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
    let window = WindowClient {
      id: format!("window-{}", open.len() + 1),
      url: url.to_string(),
    };
    info!(id = %window.id, url, "open window");
    open.push(window.clone());
    Ok(window)
  }
}
