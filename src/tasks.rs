//! Deferred side effects that keep an event alive after it has responded.

use color_eyre::Result;
use std::future::Future;
use tokio::task::JoinSet;

/// Side effects registered by an event handler.
///
/// The handler returns its value first; the host then settles the handle
/// before it considers the event complete. Dropping an unsettled handle
/// aborts whatever has not finished yet.
#[derive(Default)]
pub struct BackgroundTasks {
  set: JoinSet<(&'static str, Result<()>)>,
}

impl BackgroundTasks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a side effect now and track it under `label`.
  pub fn register<F>(&mut self, label: &'static str, task: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.set.spawn(async move { (label, task.await) });
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.set.len()
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.set.is_empty()
  }

  /// Wait for every registered side effect. Failures are logged, not
  /// propagated; returns how many failed.
  pub async fn settle(mut self) -> usize {
    let mut failed = 0;
    while let Some(joined) = self.set.join_next().await {
      match joined {
        Ok((_, Ok(()))) => {}
        Ok((label, Err(e))) => {
          failed += 1;
          tracing::warn!(task = label, error = %e, "background task failed");
        }
        Err(e) => {
          failed += 1;
          tracing::warn!(error = %e, "background task did not complete");
        }
      }
    }
    failed
  }
}
