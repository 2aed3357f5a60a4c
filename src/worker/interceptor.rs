//! Fetch handling: serve from the current bucket, else fetch and populate.

use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::lifetime::Lifetime;
use crate::cache::policy::{classify, is_storable_request, Disposition};
use crate::cache::{Bucket, CacheStorage, RequestKey};
use crate::net::{Fetcher, Request, Response};

/// How the populate step relates to the response path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
  /// Return immediately; the write runs on the event's lifetime
  #[default]
  Background,
  /// Finish the write before returning the response
  Awaited,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  Cache,
  Network,
}

/// Cache-or-fetch handler bound to one bucket.
pub struct Interceptor<S: CacheStorage, F: Fetcher> {
  bucket: Bucket<S>,
  fetcher: Arc<F>,
  store_mode: StoreMode,
}

impl<S, F> Interceptor<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher,
{
  pub fn new(bucket: Bucket<S>, fetcher: Arc<F>, store_mode: StoreMode) -> Self {
    Self {
      bucket,
      fetcher,
      store_mode,
    }
  }

  /// Produce a response for `request`.
  ///
  /// 1. A stored entry is returned as-is, without touching the network
  /// 2. Otherwise the request is fetched; a network error is returned unchanged
  /// 3. A cacheable response over http(s) is copied into the bucket
  ///
  /// In background mode the copy is registered on `lifetime`, so the caller
  /// must settle it after delivering the response.
  pub async fn handle(
    &self,
    request: Request,
    lifetime: &mut Lifetime,
  ) -> Result<(Response, Source)> {
    let key = RequestKey::from_request(&request);

    match self.bucket.get(&key).await {
      Ok(Some(hit)) => {
        debug!("Cache hit for {}", key.url());
        return Ok((hit, Source::Cache));
      }
      Ok(None) => debug!("Cache miss for {}", key.url()),
      Err(e) => warn!("Cache lookup for {} failed, using network: {}", key.url(), e),
    }

    let outcome = self.fetcher.fetch(request.duplicate()).await;
    let disposition = classify(&outcome);
    let response = outcome?;

    if disposition != Disposition::Cacheable || !is_storable_request(&request) {
      return Ok((response, Source::Network));
    }

    let store = store_entry(self.bucket.clone(), key, response.duplicate());
    match self.store_mode {
      StoreMode::Background => lifetime.wait_until(store),
      StoreMode::Awaited => store.await?,
    }

    Ok((response, Source::Network))
  }
}

/// Write one entry. Failures are logged, never surfaced to the request.
async fn store_entry<S: CacheStorage>(
  bucket: Bucket<S>,
  key: RequestKey,
  response: Response,
) -> Result<()> {
  if let Err(e) = bucket.put(key.clone(), response).await {
    warn!("Could not cache {} in {}: {}", key.url(), bucket.name(), e);
  }
  Ok(())
}
