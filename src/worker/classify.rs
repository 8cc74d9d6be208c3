//! Request classification into traffic classes.

use serde::Serialize;

use crate::config::Config;
use crate::net::Method;

/// Category of a request, deciding which fetch strategy applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrafficClass {
  StaticAsset,
  DynamicContent,
  ExcludedFromCache,
}

/// Stateless classifier over configured URL fragments.
#[derive(Debug, Clone)]
pub struct Classifier {
  dynamic_paths: Vec<String>,
  excluded_markers: Vec<String>,
  volatile_origin: Option<String>,
}

impl Classifier {
  pub fn new(
    dynamic_paths: Vec<String>,
    excluded_markers: Vec<String>,
    volatile_origin: Option<String>,
  ) -> Self {
    Self {
      dynamic_paths,
      excluded_markers,
      volatile_origin: volatile_origin.filter(|o| !o.is_empty()),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(
      config.dynamic_paths.clone(),
      config.excluded_markers.clone(),
      config.volatile_origin.clone(),
    )
  }

  /// Classify a request. Non-GET is always excluded; otherwise dynamic
  /// paths and the volatile origin are checked before the excluded markers.
  pub fn classify(&self, url: &str, method: Method) -> TrafficClass {
    if method != Method::Get {
      return TrafficClass::ExcludedFromCache;
    }

    let path = url::Url::parse(url)
      .map(|u| u.path().to_string())
      .unwrap_or_else(|_| url.to_string());

    let is_dynamic_path = self.dynamic_paths.iter().any(|p| path.contains(p.as_str()));
    let is_volatile = self
      .volatile_origin
      .as_deref()
      .is_some_and(|origin| url.contains(origin));

    if is_dynamic_path || is_volatile {
      TrafficClass::DynamicContent
    } else if self.excluded_markers.iter().any(|m| url.contains(m.as_str())) {
      TrafficClass::ExcludedFromCache
    } else {
      TrafficClass::StaticAsset
    }
  }
}
