//! Keeps an event alive until all work it scheduled has finished.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use tokio::task::JoinSet;

/// Work registered against a single lifecycle or fetch event.
///
/// Tasks start running as soon as they are registered. The event is only
/// finished once [`Lifetime::settle`] has drained every one of them.
/// Dropping a `Lifetime` without settling it aborts whatever is still running.
#[must_use = "dropping a Lifetime aborts its pending work; call settle()"]
#[derive(Default)]
pub struct Lifetime {
  tasks: JoinSet<Result<()>>,
}

impl Lifetime {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register background work that must complete before the event ends.
  pub fn wait_until<F>(&mut self, work: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    self.tasks.spawn(work);
  }

  /// Number of tasks not yet collected by `settle`.
  #[allow(dead_code)]
  pub fn pending(&self) -> usize {
    self.tasks.len()
  }

  /// Wait for every registered task. All tasks are drained even when one
  /// fails; the first failure is returned.
  pub async fn settle(mut self) -> Result<()> {
    let mut first_error = None;

    while let Some(joined) = self.tasks.join_next().await {
      let outcome = joined.map_err(|e| eyre!("Background task failed: {}", e)).and_then(|r| r);
      if let Err(e) = outcome {
        first_error.get_or_insert(e);
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
