//! The caching worker: routes each triggering event to the component that
//! owns it.

mod classify;
mod lifecycle;
mod message;
mod notify;
mod sync;

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub use classify::{Classifier, TrafficClass};
pub use lifecycle::{LifecycleManager, LifecycleState};
pub use message::ClientMessage;
pub use notify::{
  handle_click, ClickAction, Notification, Notifier, PushPayload, WindowClient, WindowClients,
};
pub use sync::SyncReconciler;

use crate::cache::{CacheLayer, CacheResult, CacheSource, CacheStorage, Generations};
use crate::clock::Clock;
use crate::config::{Config, NotificationConfig};
use crate::event::Event;
use crate::net::{FetchOptions, Network, Request};
use crate::tasks::BackgroundTasks;

/// External collaborators the worker calls out to.
#[derive(Clone)]
pub struct Collaborators {
  pub network: Arc<dyn Network>,
  pub clock: Arc<dyn Clock>,
  pub notifier: Arc<dyn Notifier>,
  pub clients: Arc<dyn WindowClients>,
}

/// What an event produced.
#[derive(Debug)]
pub enum Outcome {
  Installed { cached: usize },
  Activated { deleted: Vec<String> },
  Released,
  Response { class: TrafficClass, result: CacheResult },
  Message { message: Option<ClientMessage> },
  Synced { tag: String, purged: usize },
  Notified { notification: Notification },
  Clicked { action: ClickAction },
}

/// An event's outcome plus the side effects it registered.
///
/// The outcome is usable right away; the event is complete once `tasks`
/// has been settled.
pub struct Dispatched {
  pub outcome: Outcome,
  pub tasks: BackgroundTasks,
}

pub struct Worker<S: CacheStorage> {
  storage: Arc<S>,
  generations: Generations,
  classifier: Classifier,
  layer: CacheLayer<S>,
  lifecycle: LifecycleManager<S>,
  reconciler: SyncReconciler<S>,
  network: Arc<dyn Network>,
  notifier: Arc<dyn Notifier>,
  clients: Arc<dyn WindowClients>,
  notifications: NotificationConfig,
}

impl<S: CacheStorage + 'static> Worker<S> {
  /// Build a worker for the deployment described by `config`.
  ///
  /// Generations left over from another version mean a previous worker is
  /// still in control until it releases or skip-waiting is requested.
  pub fn new(config: &Config, storage: Arc<S>, collaborators: Collaborators) -> Result<Self> {
    let generations = config.generations();
    let previous_active = storage
      .store_names()?
      .iter()
      .any(|name| !generations.is_current(name));

    let layer = CacheLayer::new(
      Arc::clone(&storage),
      Arc::clone(&collaborators.network),
      Arc::clone(&collaborators.clock),
      generations.clone(),
    )
    .with_freshness(config.freshness()?);

    let lifecycle = LifecycleManager::new(
      Arc::clone(&storage),
      Arc::clone(&collaborators.network),
      Arc::clone(&collaborators.clock),
      generations.clone(),
      config.asset_urls()?,
      previous_active,
    )
    .with_skip_waiting_on_install(config.skip_waiting_on_install);

    let reconciler = SyncReconciler::new(
      Arc::clone(&storage),
      generations.dynamic_name.clone(),
      config.sync_tag.clone(),
      config.volatile_origin.clone(),
    );

    Ok(Self {
      storage,
      generations,
      classifier: Classifier::from_config(config),
      layer,
      lifecycle,
      reconciler,
      network: collaborators.network,
      notifier: collaborators.notifier,
      clients: collaborators.clients,
      notifications: config.notifications.clone(),
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  /// Handle one triggering event.
  pub async fn dispatch(&self, event: Event) -> Result<Dispatched> {
    let mut tasks = BackgroundTasks::new();

    let outcome = match event {
      Event::Install => Outcome::Installed {
        cached: self.lifecycle.install().await?,
      },
      Event::Activate => Outcome::Activated {
        deleted: self.lifecycle.activate().await?,
      },
      Event::Release => {
        self.lifecycle.release_previous();
        Outcome::Released
      }
      Event::Fetch {
        url,
        method,
        headers,
      } => {
        let request = headers
          .into_iter()
          .fold(Request::new(method, url), |r, (k, v)| r.header(k, v));
        self.handle_fetch(request, &mut tasks).await?
      }
      Event::Message { data } => Outcome::Message {
        message: self.handle_message(&data, &mut tasks),
      },
      Event::Sync { tag } => {
        let purged = self.reconciler.reconcile(&tag)?;
        Outcome::Synced { tag, purged }
      }
      Event::Push { data } => {
        let payload = PushPayload::parse(&data)?;
        let notification = Notification::from_push(payload, &self.notifications);
        self.notifier.show(&notification);
        Outcome::Notified { notification }
      }
      Event::NotificationClick { url } => Outcome::Clicked {
        action: handle_click(self.clients.as_ref(), &url).await?,
      },
    };

    Ok(Dispatched { outcome, tasks })
  }

  async fn handle_fetch(&self, request: Request, tasks: &mut BackgroundTasks) -> Result<Outcome> {
    let class = self.classifier.classify(&request.url, request.method);

    if self.lifecycle.state() != LifecycleState::Active {
      debug!(url = %request.url, "not controlling yet, passing through");
      let response = self
        .network
        .fetch(&request, &FetchOptions::default())
        .await?;
      return Ok(Outcome::Response {
        class,
        result: CacheResult {
          response,
          source: CacheSource::Passthrough,
        },
      });
    }

    let result = self.layer.respond(&request, class, tasks).await?;
    debug!(
      url = %request.url,
      ?class,
      source = ?result.source,
      status = result.response.status,
      "responded"
    );
    Ok(Outcome::Response { class, result })
  }

  fn handle_message(
    &self,
    data: &serde_json::Value,
    tasks: &mut BackgroundTasks,
  ) -> Option<ClientMessage> {
    let message = ClientMessage::parse(data);
    match message {
      Some(ClientMessage::SkipWaiting) => self.lifecycle.skip_waiting(),
      Some(ClientMessage::ClearCache) => {
        let storage = Arc::clone(&self.storage);
        let name = self.generations.dynamic_name.clone();
        tasks.register("clear-cache", async move {
          if storage.delete_store(&name)? {
            info!(store = %name, "dynamic cache cleared");
          }
          Ok(())
        });
      }
      None => debug!(%data, "ignoring unrecognized message"),
    }
    message
  }
}
