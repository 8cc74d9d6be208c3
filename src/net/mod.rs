//! Network boundary: the request/response model and the fetch abstraction.

mod client;
mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use client::HttpNetwork;
pub use types::{
  key_url, FetchOptions, Method, Request, Response, CONTENT_UNAVAILABLE_BODY, NETWORK_ERROR_BODY,
};

#[cfg(test)]
pub use types::CacheMode;

/// A fetch that produced no response at all.
///
/// HTTP error statuses are responses, not failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("network unreachable: {0}")]
  Offline(String),

  #[error("request timed out: {0}")]
  Timeout(String),

  #[error("request failed: {0}")]
  Request(String),
}

/// Something that can perform a fetch.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(
    &self,
    request: &Request,
    options: &FetchOptions,
  ) -> Result<Response, NetworkError>;
}
