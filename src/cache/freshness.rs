//! Freshness policy for cached entries.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// How usable a cached entry is at a given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessVerdict {
  Fresh,
  StaleButUsable,
  Expired,
}

impl FreshnessVerdict {
  pub fn is_usable(&self) -> bool {
    !matches!(self, FreshnessVerdict::Expired)
  }
}

/// Age thresholds for a traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
  /// Entries younger than this are fresh
  fresh_for: Duration,
  /// Entries older than this must not be served
  max_age: Duration,
}

impl FreshnessPolicy {
  /// A policy where every entry up to `max_age` counts as fresh.
  pub fn new(max_age: Duration) -> Self {
    Self {
      fresh_for: max_age,
      max_age,
    }
  }

  /// Narrow the fresh window. Clamped to `max_age`.
  pub fn with_fresh_for(mut self, fresh_for: Duration) -> Self {
    self.fresh_for = fresh_for.min(self.max_age);
    self
  }

  #[cfg(test)]
  pub fn max_age(&self) -> Duration {
    self.max_age
  }

  /// Judge an entry stored at `stored_at`. An age equal to `max_age` is
  /// still usable; timestamps in the future count as fresh.
  pub fn verdict(&self, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> FreshnessVerdict {
    let age = now - stored_at;
    if age > self.max_age {
      FreshnessVerdict::Expired
    } else if age > self.fresh_for {
      FreshnessVerdict::StaleButUsable
    } else {
      FreshnessVerdict::Fresh
    }
  }
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self::new(Duration::minutes(5))
  }
}
