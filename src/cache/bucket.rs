//! Handle to a single named bucket.

use color_eyre::Result;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CachedResponse, RequestKey};
use crate::net::Response;

/// A named bucket inside a storage backend.
///
/// Cheap to clone; clones share the backend.
pub struct Bucket<S: CacheStorage> {
  name: String,
  storage: Arc<S>,
}

impl<S: CacheStorage> Bucket<S> {
  /// A handle to `name` without touching storage. Lookups against a bucket
  /// that does not exist are misses; puts create it.
  pub fn new(storage: Arc<S>, name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      storage,
    }
  }

  /// Open `name`, creating the bucket if absent.
  pub async fn open(storage: Arc<S>, name: impl Into<String>) -> Result<Self> {
    let bucket = Self::new(storage, name);
    bucket.storage.open(&bucket.name).await?;
    Ok(bucket)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Replay the stored response for `key`, if any.
  pub async fn get(&self, key: &RequestKey) -> Result<Option<Response>> {
    match self.storage.match_entry(&self.name, key).await? {
      Some(cached) => Ok(Some(cached.into_response()?)),
      None => Ok(None),
    }
  }

  /// Store `response` under `key`, replacing any previous entry.
  pub async fn put(&self, key: RequestKey, response: Response) -> Result<()> {
    self
      .storage
      .put(&self.name, key, CachedResponse::snapshot(response))
      .await
  }

  pub async fn keys(&self) -> Result<Vec<RequestKey>> {
    self.storage.entries(&self.name).await
  }
}

impl<S: CacheStorage> Clone for Bucket<S> {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      storage: Arc::clone(&self.storage),
    }
  }
}
