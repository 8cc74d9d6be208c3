//! Background sync reconciliation.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheHandle, CacheStorage};
use crate::net::key_url;

/// Purges volatile-origin entries from the dynamic generation when the
/// recognized sync tag fires.
pub struct SyncReconciler<S: CacheStorage> {
  cache: CacheHandle<S>,
  tag: String,
  volatile_origin: Option<String>,
}

impl<S: CacheStorage> SyncReconciler<S> {
  pub fn new(
    storage: Arc<S>,
    dynamic_store: impl Into<String>,
    tag: impl Into<String>,
    volatile_origin: Option<String>,
  ) -> Self {
    Self {
      cache: CacheHandle::new(storage, dynamic_store),
      tag: tag.into(),
      volatile_origin: volatile_origin.filter(|o| !o.is_empty()),
    }
  }

  /// Handle a sync signal. Unknown tags are ignored. Returns the number of
  /// purged entries.
  pub fn reconcile(&self, tag: &str) -> Result<usize> {
    if tag != self.tag {
      debug!(tag, "ignoring unrecognized sync tag");
      return Ok(0);
    }
    let Some(origin) = self.volatile_origin.as_deref() else {
      return Ok(0);
    };

    let mut purged = 0;
    for key in self.cache.keys()? {
      if key_url(&key).contains(origin) && self.cache.delete(&key)? {
        purged += 1;
      }
    }

    info!(tag, store = self.cache.name(), purged, "sync reconciled");
    Ok(purged)
  }
}
