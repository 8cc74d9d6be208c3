//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use super::freshness::{FreshnessPolicy, FreshnessVerdict};
use super::storage::{CacheHandle, CacheStorage};
use super::types::{CacheEntry, CacheResult, Generations, Purpose, CACHE_TIMESTAMP_HEADER};
use crate::clock::Clock;
use crate::net::{
  FetchOptions, Network, Request, Response, CONTENT_UNAVAILABLE_BODY, NETWORK_ERROR_BODY,
};
use crate::tasks::BackgroundTasks;
use crate::worker::TrafficClass;

/// Cache layer that picks a strategy per traffic class.
///
/// This layer sits between intercepted requests and the network,
/// serving from the current generations and keeping them refreshed.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  clock: Arc<dyn Clock>,
  generations: Generations,
  /// Age limits for dynamic content served after a network failure
  freshness: FreshnessPolicy,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<dyn Network>,
    clock: Arc<dyn Clock>,
    generations: Generations,
  ) -> Self {
    Self {
      storage,
      network,
      clock,
      generations,
      freshness: FreshnessPolicy::default(),
    }
  }

  /// Set the freshness policy for network-first content.
  pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
    self.freshness = freshness;
    self
  }

  fn cache(&self, purpose: Purpose) -> CacheHandle<S> {
    CacheHandle::new(Arc::clone(&self.storage), self.generations.name(purpose))
  }

  /// Answer a request with the strategy for its class.
  ///
  /// Cache writes and evictions are registered on `tasks` rather than
  /// awaited, so the response is available before they settle.
  pub async fn respond(
    &self,
    request: &Request,
    class: TrafficClass,
    tasks: &mut BackgroundTasks,
  ) -> Result<CacheResult> {
    match class {
      TrafficClass::StaticAsset => self.cache_first(request, true, tasks).await,
      TrafficClass::ExcludedFromCache => self.cache_first(request, false, tasks).await,
      TrafficClass::DynamicContent => self.network_first(request, tasks).await,
    }
  }

  /// Fetch with cache-first strategy.
  ///
  /// 1. Look in the static generation, then the dynamic one; a hit is
  ///    returned as-is without touching the network
  /// 2. On a miss, fetch from network; failures propagate
  /// 3. If `write_back`, store 2xx responses in the dynamic generation
  pub async fn cache_first(
    &self,
    request: &Request,
    write_back: bool,
    tasks: &mut BackgroundTasks,
  ) -> Result<CacheResult> {
    let key = request.cache_key();

    for purpose in [Purpose::Static, Purpose::Dynamic] {
      if let Some(entry) = self.cache(purpose).get(&key)? {
        debug!(key = %key, ?purpose, "cache hit");
        return Ok(CacheResult::from_cache(entry.to_response(), false));
      }
    }

    debug!(key = %key, "cache miss, fetching");
    let response = self
      .network
      .fetch(request, &FetchOptions::default())
      .await?;

    if write_back && response.is_ok() {
      let entry = CacheEntry::from_response(key, &response, self.clock.now());
      let cache = self.cache(Purpose::Dynamic);
      tasks.register("cache-put", async move { cache.put(&entry) });
    }

    Ok(CacheResult::from_network(response))
  }

  /// Fetch with network-first strategy and a freshness check on fallback.
  ///
  /// 1. Fetch bypassing intermediate caches; store 2xx responses with an
  ///    `x-cache-timestamp` annotation and return the live response
  /// 2. On network failure, serve the cached entry unless it has expired
  /// 3. Expired entries are evicted and answered with a synthetic 503, as
  ///    is a missing entry
  pub async fn network_first(
    &self,
    request: &Request,
    tasks: &mut BackgroundTasks,
  ) -> Result<CacheResult> {
    let key = request.cache_key();
    let cache = self.cache(Purpose::Dynamic);

    let error = match self.network.fetch(request, &FetchOptions::no_store()).await {
      Ok(response) => {
        if response.is_ok() {
          let fetched_at = self.clock.now();
          let annotated = response.clone().with_header(
            CACHE_TIMESTAMP_HEADER,
            fetched_at.timestamp_millis().to_string(),
          );
          let entry = CacheEntry::from_response(key, &annotated, fetched_at);
          tasks.register("cache-put", async move { cache.put(&entry) });
        }
        return Ok(CacheResult::from_network(response));
      }
      Err(error) => error,
    };

    debug!(key = %key, %error, "network failed, falling back to cache");
    let Some(entry) = cache.get(&key)? else {
      return Ok(CacheResult::synthetic(Response::unavailable(
        NETWORK_ERROR_BODY,
      )));
    };

    let verdict = self.freshness.verdict(entry.timestamp(), self.clock.now());
    if !verdict.is_usable() {
      info!(key = %key, stored_at = %entry.timestamp(), "evicting expired entry");
      tasks.register("cache-evict", async move { cache.delete(&key).map(|_| ()) });
      return Ok(CacheResult::synthetic(Response::unavailable(
        CONTENT_UNAVAILABLE_BODY,
      )));
    }

    Ok(CacheResult::from_cache(
      entry.to_response(),
      verdict == FreshnessVerdict::StaleButUsable,
    ))
  }
}
