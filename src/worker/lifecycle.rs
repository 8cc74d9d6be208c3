//! Install and activation of cache generations.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::cache::{CacheEntry, CacheHandle, CacheStorage, Generations};
use crate::clock::Clock;
use crate::net::{FetchOptions, Network, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  Installing,
  Waiting,
  Activating,
  Active,
}

/// Lifecycle state machine, free of I/O.
#[derive(Debug, Clone)]
pub struct Lifecycle {
  state: LifecycleState,
  skip_waiting: bool,
  /// Whether an earlier version still controls clients
  previous_active: bool,
}

impl Lifecycle {
  pub fn new(previous_active: bool) -> Self {
    Self {
      state: LifecycleState::Installing,
      skip_waiting: false,
      previous_active,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  /// The previous version let go of its clients.
  pub fn release_previous(&mut self) {
    self.previous_active = false;
  }

  pub fn can_activate(&self) -> bool {
    self.state == LifecycleState::Waiting && (self.skip_waiting || !self.previous_active)
  }

  fn finish_install(&mut self) -> Result<()> {
    self.require(LifecycleState::Installing)?;
    self.state = LifecycleState::Waiting;
    Ok(())
  }

  fn begin_activate(&mut self) -> Result<()> {
    self.require(LifecycleState::Waiting)?;
    if !self.can_activate() {
      return Err(eyre!(
        "Activation deferred: a previous version still controls clients (send skipWaiting)"
      ));
    }
    self.state = LifecycleState::Activating;
    Ok(())
  }

  fn finish_activate(&mut self, succeeded: bool) {
    self.state = if succeeded {
      self.previous_active = false;
      LifecycleState::Active
    } else {
      LifecycleState::Waiting
    };
  }

  fn require(&self, state: LifecycleState) -> Result<()> {
    if self.state == state {
      Ok(())
    } else {
      Err(eyre!("Expected lifecycle state {:?}, found {:?}", state, self.state))
    }
  }
}

/// Owns generation names, the bootstrap asset list and the lifecycle state.
pub struct LifecycleManager<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  clock: Arc<dyn Clock>,
  generations: Generations,
  assets: Vec<String>,
  skip_waiting_on_install: bool,
  lifecycle: Mutex<Lifecycle>,
}

impl<S: CacheStorage> LifecycleManager<S> {
  /// `previous_active` tells whether an older version is still in control.
  pub fn new(
    storage: Arc<S>,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    generations: Generations,
    assets: Vec<String>,
    previous_active: bool,
  ) -> Self {
    Self {
      storage,
      network,
      clock,
      generations,
      assets,
      skip_waiting_on_install: false,
      lifecycle: Mutex::new(Lifecycle::new(previous_active)),
    }
  }

  pub fn with_skip_waiting_on_install(mut self, skip: bool) -> Self {
    self.skip_waiting_on_install = skip;
    self
  }

  fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
    self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle().state()
  }

  /// Allow activation even while a previous version holds clients.
  pub fn skip_waiting(&self) {
    info!("skip waiting requested");
    self.lifecycle().skip_waiting();
  }

  /// The previous version no longer controls any client.
  pub fn release_previous(&self) {
    self.lifecycle().release_previous();
  }

  /// Pre-populate the static generation.
  ///
  /// Every asset must be fetched with a 2xx status before anything is
  /// written, and the writes happen in one transaction. On failure nothing
  /// is stored and the state stays `Installing` so the install can be retried.
  pub async fn install(&self) -> Result<usize> {
    self.lifecycle().require(LifecycleState::Installing)?;

    let cache = CacheHandle::new(Arc::clone(&self.storage), &self.generations.static_name);
    info!(store = cache.name(), assets = self.assets.len(), "installing");

    let fetches = self.assets.iter().map(|url| async move {
      let request = Request::get(url.as_str());
      let response = self
        .network
        .fetch(&request, &FetchOptions::default())
        .await
        .map_err(|e| eyre!("Failed to fetch static asset {}: {}", url, e))?;
      if !response.is_ok() {
        return Err(eyre!(
          "Static asset {} returned status {}",
          url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>(CacheEntry::from_response(
        request.cache_key(),
        &response,
        self.clock.now(),
      ))
    });

    let entries = match try_join_all(fetches).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "install failed");
        return Err(e);
      }
    };
    cache.put_all(&entries)?;

    let mut lifecycle = self.lifecycle();
    lifecycle.finish_install()?;
    if self.skip_waiting_on_install {
      lifecycle.skip_waiting();
    }
    info!(store = cache.name(), cached = entries.len(), "installed");

    Ok(entries.len())
  }

  /// Delete every generation other than the current two, open the dynamic
  /// generation, then become active.
  ///
  /// Returns the deleted store names. Readiness is only reported once all
  /// deletions have completed; a failed deletion returns to `Waiting`.
  pub async fn activate(&self) -> Result<Vec<String>> {
    self.lifecycle().begin_activate()?;

    let result = self.delete_old_generations().and_then(|deleted| {
      self.storage.open(&self.generations.dynamic_name)?;
      Ok(deleted)
    });
    self.lifecycle().finish_activate(result.is_ok());

    if result.is_ok() {
      info!(
        static_store = %self.generations.static_name,
        dynamic_store = %self.generations.dynamic_name,
        "active"
      );
    }
    result
  }

  fn delete_old_generations(&self) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.store_names()? {
      if self.generations.is_current(&name) {
        continue;
      }
      if self.storage.delete_store(&name)? {
        info!(store = %name, "deleted old generation");
        deleted.push(name);
      }
    }
    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::clock::SystemClock;
  use crate::net::fake::FakeNetwork;
  use crate::net::Response;

  const ASSETS: [&str; 3] = [
    "https://example.com/",
    "https://example.com/index.html",
    "https://example.com/site.webmanifest",
  ];

  fn network_with_assets() -> FakeNetwork {
    ASSETS.iter().fold(FakeNetwork::new(), |n, url| {
      n.route(url, Response::new(200, format!("asset {}", url)))
    })
  }

  fn manager(
    storage: &Arc<SqliteStorage>,
    network: FakeNetwork,
    previous_active: bool,
  ) -> LifecycleManager<SqliteStorage> {
    LifecycleManager::new(
      Arc::clone(storage),
      Arc::new(network),
      Arc::new(SystemClock),
      Generations::new("v2-static", "v2-dynamic"),
      ASSETS.iter().map(|s| s.to_string()).collect(),
      previous_active,
    )
  }

  #[tokio::test]
  async fn test_install_caches_every_asset() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, network_with_assets(), false);

    assert_eq!(manager.install().await.unwrap(), 3);
    assert_eq!(manager.state(), LifecycleState::Waiting);

    let keys = storage.keys("v2-static").unwrap();
    assert_eq!(keys.len(), 3);
    let index = storage
      .get("v2-static", "GET https://example.com/index.html")
      .unwrap()
      .unwrap();
    assert_eq!(index.payload.as_ref(), b"asset https://example.com/index.html");
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = FakeNetwork::new()
      .route(ASSETS[0], Response::new(200, "home"))
      .route(ASSETS[1], Response::new(200, "index"));
    let manager = manager(&storage, network, false);

    assert!(manager.install().await.is_err());
    assert_eq!(manager.state(), LifecycleState::Installing);
    assert!(storage.keys("v2-static").unwrap().is_empty());
    assert!(storage.store_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = network_with_assets();
    network.set_route(ASSETS[2], Response::new(404, "gone"));
    let manager = manager(&storage, network, false);

    let err = manager.install().await.unwrap_err();
    assert!(err.to_string().contains("404"));
    assert!(storage.keys("v2-static").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_install_can_be_retried() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    let manager = LifecycleManager::new(
      Arc::clone(&storage),
      network.clone(),
      Arc::new(SystemClock),
      Generations::new("v2-static", "v2-dynamic"),
      vec![ASSETS[0].to_string()],
      false,
    );

    assert!(manager.install().await.is_err());
    network.set_route(ASSETS[0], Response::new(200, "home"));
    assert_eq!(manager.install().await.unwrap(), 1);
    assert!(manager.install().await.is_err());
  }

  #[tokio::test]
  async fn test_activate_opens_both_generations() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, network_with_assets(), false);
    manager.install().await.unwrap();
    assert_eq!(storage.store_names().unwrap(), vec!["v2-static"]);

    assert!(manager.activate().await.unwrap().is_empty());
    assert_eq!(storage.store_names().unwrap(), vec!["v2-static", "v2-dynamic"]);
  }

  #[tokio::test]
  async fn test_activate_deletes_old_generations() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    for name in ["v1-static", "v1-dynamic", "v2-static", "v2-dynamic"] {
      storage.open(name).unwrap();
    }
    let manager = manager(&storage, network_with_assets(), false);
    manager.install().await.unwrap();

    let deleted = manager.activate().await.unwrap();

    assert_eq!(deleted, vec!["v1-static", "v1-dynamic"]);
    assert_eq!(storage.store_names().unwrap(), vec!["v2-static", "v2-dynamic"]);
    assert_eq!(manager.state(), LifecycleState::Active);
    assert_eq!(storage.keys("v2-static").unwrap().len(), 3);
  }

  #[tokio::test]
  async fn test_activate_requires_install() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, network_with_assets(), false);

    assert!(manager.activate().await.is_err());
    assert_eq!(manager.state(), LifecycleState::Installing);
  }

  #[tokio::test]
  async fn test_activation_waits_for_previous_version() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.open("v1-static").unwrap();
    let manager = manager(&storage, network_with_assets(), true);
    manager.install().await.unwrap();

    assert!(manager.activate().await.is_err());
    assert_eq!(manager.state(), LifecycleState::Waiting);
    assert!(storage.store_names().unwrap().contains(&"v1-static".to_string()));

    manager.skip_waiting();
    assert_eq!(manager.activate().await.unwrap(), vec!["v1-static"]);
  }

  #[tokio::test]
  async fn test_release_previous_allows_activation() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager = manager(&storage, network_with_assets(), true);
    manager.install().await.unwrap();

    manager.release_previous();
    assert!(manager.activate().await.is_ok());
  }

  #[tokio::test]
  async fn test_skip_waiting_on_install() {
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let manager =
      manager(&storage, network_with_assets(), true).with_skip_waiting_on_install(true);
    manager.install().await.unwrap();

    assert!(manager.activate().await.is_ok());
    assert_eq!(manager.state(), LifecycleState::Active);
  }

  #[test]
  fn test_state_machine_transitions() {
    let mut lifecycle = Lifecycle::new(false);
    assert!(!lifecycle.can_activate());
    lifecycle.finish_install().unwrap();
    assert!(lifecycle.can_activate());
    lifecycle.begin_activate().unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Activating);
    lifecycle.finish_activate(true);
    assert_eq!(lifecycle.state(), LifecycleState::Active);
    assert!(lifecycle.finish_install().is_err());
  }
}
