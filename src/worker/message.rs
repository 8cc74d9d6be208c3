//! Control messages posted by client pages.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
  /// Activate without waiting for the previous version to release
  SkipWaiting,
  /// Drop the whole dynamic generation
  ClearCache,
}

impl ClientMessage {
  /// Recognize `"skipWaiting"`, `{"type": "SKIP_WAITING"}` and `"clearCache"`.
  pub fn parse(data: &Value) -> Option<Self> {
    match data {
      Value::String(s) if s == "skipWaiting" => Some(Self::SkipWaiting),
      Value::String(s) if s == "clearCache" => Some(Self::ClearCache),
      Value::Object(map) => match map.get("type").and_then(Value::as_str) {
        Some("SKIP_WAITING") => Some(Self::SkipWaiting),
        _ => None,
      },
      _ => None,
    }
  }
}
