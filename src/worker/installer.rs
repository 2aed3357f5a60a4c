//! Install step: pre-populate the version's bucket with the asset manifest.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::info;
use url::Url;

use super::clients::Clients;
use crate::cache::{Bucket, CacheStorage, RequestKey};
use crate::net::{Fetcher, Request};

/// Fetch every asset and store it in `bucket`.
///
/// All assets are fetched before anything is written, so a single
/// unreachable asset (or non-2xx response) aborts the install with the
/// bucket contents untouched. Returns the number of entries stored.
pub async fn install<S, F, C>(
  bucket: &Bucket<S>,
  assets: Vec<Url>,
  fetcher: &F,
  clients: &C,
) -> Result<usize>
where
  S: CacheStorage,
  F: Fetcher + ?Sized,
  C: Clients + ?Sized,
{
  // Take over as soon as install finishes
  clients.skip_waiting().await?;

  info!("Caching {} assets into {}", assets.len(), bucket.name());

  let responses = try_join_all(assets.into_iter().map(|url| async move {
    let response = fetcher
      .fetch(Request::get(url.clone()))
      .await
      .map_err(|e| eyre!("Failed to cache {}: {}", url, e))?;

    if !response.ok() {
      return Err(eyre!(
        "Failed to cache {}: server responded {}",
        url,
        response.status()
      ));
    }
    Ok((RequestKey::get(&url), response))
  }))
  .await?;

  let stored = responses.len();
  for (key, response) in responses {
    bucket.put(key, response).await?;
  }

  Ok(stored)
}
