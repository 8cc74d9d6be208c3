//! Request and response types shared by the network client and the cache.

use bytes::Bytes;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Body of the synthetic response returned when nothing usable exists.
pub const NETWORK_ERROR_BODY: &str = "Network error";
/// Body of the synthetic response returned after evicting an expired entry.
pub const CONTENT_UNAVAILABLE_BODY: &str = "Content unavailable";

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Method {
  #[default]
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(format!("unsupported method: {}", other)),
    }
  }
}

impl TryFrom<String> for Method {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub headers: BTreeMap<String, String>,
}

impl Request {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: BTreeMap::new(),
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::Get, url)
  }

  pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
    self
      .headers
      .insert(key.as_ref().to_ascii_lowercase(), value.into());
    self
  }

  /// Identity of this request inside a cache store: method plus canonical URL.
  ///
  /// The canonical URL is the parsed URL without its fragment. Unparseable
  /// URLs are used verbatim.
  pub fn cache_key(&self) -> String {
    let url = match url::Url::parse(&self.url) {
      Ok(mut parsed) => {
        parsed.set_fragment(None);
        parsed.to_string()
      }
      Err(_) => self.url.clone(),
    };
    format!("{} {}", self.method, url)
  }
}

/// Extract the URL part of a cache key.
pub fn key_url(key: &str) -> &str {
  key.split_once(' ').map_or(key, |(_, url)| url)
}

/// A response, either live from the network, rebuilt from a cache entry, or
/// synthesized.
///
/// The body is an immutable shared buffer, so cloning a response yields a
/// second read-only view rather than a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  /// Header names are stored lowercase.
  pub headers: BTreeMap<String, String>,
  pub body: Bytes,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    let status_text = reqwest::StatusCode::from_u16(status)
      .ok()
      .and_then(|s| s.canonical_reason())
      .unwrap_or_default()
      .to_string();

    Self {
      status,
      status_text,
      headers: BTreeMap::new(),
      body: body.into(),
    }
  }

  /// A synthetic 503 carrying a plain-text message.
  pub fn unavailable(message: &'static str) -> Self {
    Self::new(503, message).with_header("content-type", "text/plain")
  }

  pub fn with_header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
    self
      .headers
      .insert(key.as_ref().to_ascii_lowercase(), value.into());
    self
  }

  #[cfg(test)]
  pub fn header(&self, key: &str) -> Option<&str> {
    self
      .headers
      .get(&key.to_ascii_lowercase())
      .map(String::as_str)
  }

  /// Whether the status is in the 2xx range.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[cfg(test)]
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// How the underlying HTTP cache should treat a fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  /// Bypass any intermediate cache. Over HTTP this only sends
  /// `cache-control: no-cache` and `pragma: no-cache`.
  NoStore,
}

/// Per-fetch options passed to the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
  pub cache_mode: CacheMode,
  pub headers: BTreeMap<String, String>,
}

impl FetchOptions {
  /// Options for content that must always come from the origin.
  pub fn no_store() -> Self {
    Self {
      cache_mode: CacheMode::NoStore,
      ..Self::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_strips_fragment() {
    let request = Request::get("https://example.com/banner#top");
    assert_eq!(request.cache_key(), "GET https://example.com/banner");
  }

  #[test]
  fn test_cache_key_includes_method() {
    let request = Request::new(Method::Post, "https://example.com/form");
    assert_eq!(request.cache_key(), "POST https://example.com/form");
    assert_eq!(key_url(&request.cache_key()), "https://example.com/form");
  }

  #[test]
  fn test_method_parse_is_case_insensitive() {
    assert_eq!("post".parse::<Method>(), Ok(Method::Post));
    assert!("BREW".parse::<Method>().is_err());
  }

  #[test]
  fn test_unavailable_response() {
    let response = Response::unavailable(NETWORK_ERROR_BODY);
    assert_eq!(response.status, 503);
    assert_eq!(response.status_text, "Service Unavailable");
    assert_eq!(response.text(), "Network error");
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
    assert!(!response.is_ok());
  }

  #[test]
  fn test_no_store_options() {
    let options = FetchOptions::no_store();
    assert_eq!(options.cache_mode, CacheMode::NoStore);
    assert!(options.headers.is_empty());
  }
}
