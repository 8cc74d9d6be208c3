use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, CACHE_CONTROL, PRAGMA};
use std::collections::BTreeMap;

use super::types::{CacheMode, FetchOptions, Request, Response};
use super::{Network, NetworkError};

/// Network backed by a real HTTP client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("swcache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(
    &self,
    request: &Request,
    options: &FetchOptions,
  ) -> std::result::Result<Response, NetworkError> {
    let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
      .map_err(|e| NetworkError::Request(e.to_string()))?;

    let mut builder = self.client.request(method, &request.url);
    for (key, value) in request.headers.iter().chain(options.headers.iter()) {
      builder = builder.header(key.as_str(), value.as_str());
    }
    if options.cache_mode == CacheMode::NoStore {
      builder = builder
        .header(CACHE_CONTROL, "no-cache")
        .header(PRAGMA, "no-cache");
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = collect_headers(response.headers());
    let body = response.bytes().await?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body,
    })
  }
}

/// Lowercase names; repeated headers are joined with `, `. Values that are
/// not visible ASCII are dropped.
fn collect_headers(map: &HeaderMap) -> BTreeMap<String, String> {
  let mut headers: BTreeMap<String, String> = BTreeMap::new();
  for (key, value) in map {
    let Ok(value) = value.to_str() else {
      continue;
    };
    headers
      .entry(key.as_str().to_ascii_lowercase())
      .and_modify(|joined| {
        joined.push_str(", ");
        joined.push_str(value);
      })
      .or_insert_with(|| value.to_string());
  }
  headers
}

impl From<reqwest::Error> for NetworkError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      NetworkError::Timeout(e.to_string())
    } else if e.is_connect() {
      NetworkError::Offline(e.to_string())
    } else {
      NetworkError::Request(e.to_string())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::Method;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  #[tokio::test]
  async fn test_fetch_returns_status_headers_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/index.html"))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("X-Served-By", "origin")
          .set_body_string("<html></html>"),
      )
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let request = Request::get(format!("{}/index.html", server.uri()));
    let response = network
      .fetch(&request, &FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.header("x-served-by"), Some("origin"));
    assert_eq!(response.text(), "<html></html>");
  }

  #[tokio::test]
  async fn test_repeated_headers_are_joined() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/"))
      .respond_with(
        ResponseTemplate::new(200)
          .append_header("set-cookie", "a=1")
          .append_header("set-cookie", "b=2"),
      )
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let request = Request::get(format!("{}/", server.uri()));
    let response = network
      .fetch(&request, &FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(response.header("set-cookie"), Some("a=1, b=2"));
  }

  #[test]
  fn test_collect_headers_skips_opaque_values() {
    let mut map = HeaderMap::new();
    map.append("vary", "origin".parse().unwrap());
    map.append("vary", "accept".parse().unwrap());
    map.append(
      "x-raw",
      reqwest::header::HeaderValue::from_bytes(&[0xfa]).unwrap(),
    );

    let headers = collect_headers(&map);
    assert_eq!(headers.get("vary").map(String::as_str), Some("origin, accept"));
    assert!(!headers.contains_key("x-raw"));
  }

  #[tokio::test]
  async fn test_no_store_sends_no_cache_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/banner"))
      .and(header("cache-control", "no-cache"))
      .and(header("pragma", "no-cache"))
      .respond_with(ResponseTemplate::new(200).set_body_string("fresh banner"))
      .expect(1)
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let request = Request::get(format!("{}/banner", server.uri()));
    let response = network
      .fetch(&request, &FetchOptions::no_store())
      .await
      .unwrap();

    assert_eq!(response.text(), "fresh banner");
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/api/submit"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let network = HttpNetwork::new().unwrap();
    let request = Request::new(Method::Post, format!("{}/api/submit", server.uri()));
    let response = network
      .fetch(&request, &FetchOptions::default())
      .await
      .unwrap();

    assert_eq!(response.status, 404);
    assert!(!response.is_ok());
  }

  #[tokio::test]
  async fn test_unreachable_host_is_offline() {
    let network = HttpNetwork::new().unwrap();
    let request = Request::get("http://127.0.0.1:1/");
    let result = network.fetch(&request, &FetchOptions::default()).await;

    assert!(matches!(result, Err(NetworkError::Offline(_))));
  }
}
