//! In-memory bucket storage.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::storage::{reject_non_get, CacheStorage, RegistrationStore};
use super::traits::{CachedResponse, Registration, RequestKey};
use crate::worker::WorkerState;

struct MemoryBucket {
  name: String,
  entries: Vec<(RequestKey, CachedResponse)>,
}

/// Storage that lives only as long as the process.
/// Used for `--ephemeral` runs and tests.
#[derive(Default)]
pub struct MemoryStorage {
  buckets: Mutex<Vec<MemoryBucket>>,
  registrations: Mutex<Vec<Registration>>,
  failing_deletes: Mutex<HashSet<String>>,
  failing_puts: AtomicBool,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Make `delete` fail for the named bucket.
  #[cfg(test)]
  pub fn fail_delete_of(&self, name: &str) {
    if let Ok(mut failing) = self.failing_deletes.lock() {
      failing.insert(name.to_string());
    }
  }

  /// Make every `put` fail, as a full quota would.
  #[cfg(test)]
  pub fn fail_puts(&self, fail: bool) {
    self.failing_puts.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
  async fn open(&self, name: &str) -> Result<()> {
    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if !buckets.iter().any(|b| b.name == name) {
      buckets.push(MemoryBucket {
        name: name.to_string(),
        entries: Vec::new(),
      });
    }
    Ok(())
  }

  async fn has(&self, name: &str) -> Result<bool> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.iter().any(|b| b.name == name))
  }

  async fn keys(&self) -> Result<Vec<String>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(buckets.iter().map(|b| b.name.clone()).collect())
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let failing = self
      .failing_deletes
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .contains(name);
    if failing {
      return Err(eyre!("Failed to delete bucket {}: storage unavailable", name));
    }

    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = buckets.len();
    buckets.retain(|b| b.name != name);
    Ok(buckets.len() != before)
  }

  async fn match_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    if !key.is_get() {
      return Ok(None);
    }

    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      buckets
        .iter()
        .find(|b| b.name == bucket)
        .and_then(|b| b.entries.iter().find(|(k, _)| k == key))
        .map(|(_, response)| response.clone()),
    )
  }

  async fn put(&self, bucket: &str, key: RequestKey, response: CachedResponse) -> Result<()> {
    reject_non_get(&key)?;
    if self.failing_puts.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to store entry {}: quota exceeded", key.url()));
    }

    let mut buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let pos = match buckets.iter().position(|b| b.name == bucket) {
      Some(pos) => pos,
      None => {
        buckets.push(MemoryBucket {
          name: bucket.to_string(),
          entries: Vec::new(),
        });
        buckets.len() - 1
      }
    };

    let entries = &mut buckets[pos].entries;
    match entries.iter_mut().find(|(k, _)| *k == key) {
      Some((_, existing)) => *existing = response,
      None => entries.push((key, response)),
    }
    Ok(())
  }

  async fn entries(&self, bucket: &str) -> Result<Vec<RequestKey>> {
    let buckets = self
      .buckets
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      buckets
        .iter()
        .find(|b| b.name == bucket)
        .map(|b| b.entries.iter().map(|(k, _)| k.clone()).collect())
        .unwrap_or_default(),
    )
  }
}

#[async_trait]
impl RegistrationStore for MemoryStorage {
  async fn registration(&self, version: &str) -> Result<Option<Registration>> {
    let registrations = self
      .registrations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(registrations.iter().find(|r| r.version == version).cloned())
  }

  async fn record(&self, version: &str, state: WorkerState) -> Result<()> {
    let mut registrations = self
      .registrations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let now = Utc::now();

    if state == WorkerState::Activated {
      for other in registrations.iter_mut().filter(|r| r.version != version) {
        other.state = WorkerState::Redundant;
        other.updated_at = now;
      }
    }

    match registrations.iter_mut().find(|r| r.version == version) {
      Some(existing) => {
        existing.state = state;
        existing.updated_at = now;
      }
      None => registrations.push(Registration {
        version: version.to_string(),
        state,
        updated_at: now,
      }),
    }
    Ok(())
  }

  async fn active_version(&self) -> Result<Option<String>> {
    let registrations = self
      .registrations
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      registrations
        .iter()
        .find(|r| r.state == WorkerState::Activated)
        .map(|r| r.version.clone()),
    )
  }
}
