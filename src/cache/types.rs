//! Core types for the caching system.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::net::Response;

/// Header carrying the epoch-millisecond write time of a network-first entry.
pub const CACHE_TIMESTAMP_HEADER: &str = "x-cache-timestamp";

/// A stored response.
///
/// Entries are replaced wholesale on refresh; `stored_at` is fixed at write
/// time and never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  /// Method plus canonical URL, see [`crate::net::Request::cache_key`]
  pub request_key: String,
  pub payload: Bytes,
  pub status: u16,
  pub status_text: String,
  pub headers: BTreeMap<String, String>,
  pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Capture a response for storage. The payload shares the response buffer.
  pub fn from_response(
    request_key: impl Into<String>,
    response: &Response,
    stored_at: DateTime<Utc>,
  ) -> Self {
    Self {
      request_key: request_key.into(),
      payload: response.body.clone(),
      status: response.status,
      status_text: response.status_text.clone(),
      headers: response.headers.clone(),
      stored_at,
    }
  }

  /// Rebuild the response this entry was captured from.
  pub fn to_response(&self) -> Response {
    Response {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      body: self.payload.clone(),
    }
  }

  /// Time used for freshness decisions.
  ///
  /// Prefers the `x-cache-timestamp` annotation and falls back to the write
  /// time when the header is missing or malformed.
  pub fn timestamp(&self) -> DateTime<Utc> {
    self
      .headers
      .get(CACHE_TIMESTAMP_HEADER)
      .and_then(|v| v.parse::<i64>().ok())
      .and_then(DateTime::<Utc>::from_timestamp_millis)
      .unwrap_or(self.stored_at)
  }
}

/// What a cache generation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
  /// Pre-populated bootstrap assets
  Static,
  /// Runtime-fetched and frequently changing content
  Dynamic,
}

/// Names of the current static and dynamic generations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generations {
  pub static_name: String,
  pub dynamic_name: String,
}

impl Generations {
  pub fn new(static_name: impl Into<String>, dynamic_name: impl Into<String>) -> Self {
    Self {
      static_name: static_name.into(),
      dynamic_name: dynamic_name.into(),
    }
  }

  /// Derive versioned names, e.g. `app-v2` and `app-dynamic-v2`.
  pub fn versioned(cache_name: &str, version: &str) -> Self {
    Self::new(
      format!("{}-{}", cache_name, version),
      format!("{}-dynamic-{}", cache_name, version),
    )
  }

  pub fn name(&self, purpose: Purpose) -> &str {
    match purpose {
      Purpose::Static => &self.static_name,
      Purpose::Dynamic => &self.dynamic_name,
    }
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }
}

/// Result of a strategy, including where the response came from.
#[derive(Debug, Clone)]
pub struct CacheResult {
  pub response: Response,
  pub source: CacheSource,
}

impl CacheResult {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(response: Response, is_stale: bool) -> Self {
    Self {
      response,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
    }
  }

  pub fn synthetic(response: Response) -> Self {
    Self {
      response,
      source: CacheSource::Synthetic,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Live from the network
  Network,
  /// From cache, within its freshness window
  CacheFresh,
  /// From cache after a network failure, past freshness but not expired
  CacheStale,
  /// Fabricated to report a terminal failure
  Synthetic,
  /// Straight from the network, the worker was not yet controlling
  Passthrough,
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  #[test]
  fn test_timestamp_prefers_header() {
    let stored_at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let annotated = stored_at - chrono::Duration::minutes(3);
    let response = Response::new(200, "x").with_header(
      CACHE_TIMESTAMP_HEADER,
      annotated.timestamp_millis().to_string(),
    );

    let entry = CacheEntry::from_response("GET https://a/", &response, stored_at);
    assert_eq!(entry.timestamp(), annotated);
  }

  #[test]
  fn test_timestamp_falls_back_to_stored_at() {
    let stored_at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let response = Response::new(200, "x").with_header(CACHE_TIMESTAMP_HEADER, "garbage");

    let entry = CacheEntry::from_response("GET https://a/", &response, stored_at);
    assert_eq!(entry.timestamp(), stored_at);
  }

  #[test]
  fn test_versioned_generations() {
    let generations = Generations::versioned("app", "v2");
    assert_eq!(generations.name(Purpose::Static), "app-v2");
    assert_eq!(generations.name(Purpose::Dynamic), "app-dynamic-v2");
    assert!(generations.is_current("app-dynamic-v2"));
    assert!(!generations.is_current("app-v1"));
  }
}
