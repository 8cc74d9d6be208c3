use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{FreshnessPolicy, Generations};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin that relative static asset paths resolve against
  pub origin: String,
  /// Prefix of the generation names
  pub cache_name: String,
  /// Deployment version; bumping it supersedes every existing generation
  pub version: String,
  /// Assets pre-cached at install
  pub static_assets: Vec<String>,
  /// Path fragments of frequently changing embedded widgets
  pub dynamic_paths: Vec<String>,
  /// URL markers of API and realtime traffic that must never be cached
  pub excluded_markers: Vec<String>,
  /// Origin of volatile embedded content, purged on background sync
  pub volatile_origin: Option<String>,
  /// Background sync tag that triggers the purge
  pub sync_tag: String,
  /// Oldest cached dynamic content served when offline
  pub max_age_secs: u64,
  /// Cached dynamic content younger than this is reported fresh
  pub fresh_secs: Option<u64>,
  /// Activate right after install instead of waiting for the previous version
  pub skip_waiting_on_install: bool,
  pub notifications: NotificationConfig,
  /// Cache database path (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      cache_name: "swcache".to_string(),
      version: "v1".to_string(),
      static_assets: [
        "/",
        "/index.html",
        "/site.webmanifest",
        "/favicon-16x16.png",
        "/favicon-32x32.png",
        "/apple-touch-icon.png",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
      dynamic_paths: ["/banner", "/carousel", "/promos"]
        .into_iter()
        .map(String::from)
        .collect(),
      excluded_markers: ["api", "socket"].into_iter().map(String::from).collect(),
      volatile_origin: Some("script.google.com".to_string()),
      sync_tag: "refresh-content".to_string(),
      max_age_secs: 300,
      fresh_secs: None,
      skip_waiting_on_install: true,
      notifications: NotificationConfig::default(),
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub default_title: String,
  pub default_body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: "Update".to_string(),
      default_body: "An update is available!".to_string(),
      icon: "/apple-touch-icon.png".to_string(),
      badge: "/favicon-32x32.png".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swcache/config.yaml
  ///
  /// Without any file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.freshness()?;
    Ok(config)
  }

  /// Names of the generations this deployment owns.
  pub fn generations(&self) -> Generations {
    Generations::versioned(&self.cache_name, &self.version)
  }

  pub fn freshness(&self) -> Result<FreshnessPolicy> {
    let policy = FreshnessPolicy::new(seconds("max_age_secs", self.max_age_secs)?);
    match self.fresh_secs {
      Some(secs) => Ok(policy.with_fresh_for(seconds("fresh_secs", secs)?)),
      None => Ok(policy),
    }
  }

  /// Absolute URLs of the static assets.
  pub fn asset_urls(&self) -> Result<Vec<String>> {
    let origin = url::Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;

    self
      .static_assets
      .iter()
      .map(|asset| {
        origin
          .join(asset)
          .map(String::from)
          .map_err(|e| eyre!("Invalid static asset {}: {}", asset, e))
      })
      .collect()
  }

  /// Path of the cache database.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

fn seconds(field: &str, secs: u64) -> Result<chrono::Duration> {
  i64::try_from(secs)
    .ok()
    .and_then(chrono::Duration::try_seconds)
    .ok_or_else(|| eyre!("{} out of range: {}", field, secs))
}

/// Directory for the cache database and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("swcache"))
}
