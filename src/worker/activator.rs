//! Activate step: drop stale buckets and take control of open clients.

use color_eyre::Result;
use futures::future::join_all;
use tracing::{info, warn};

use super::clients::Clients;
use crate::cache::CacheStorage;

/// What an activation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Clients that switched to the new version
  pub claimed: usize,
  /// Stale buckets removed
  pub deleted: Vec<String>,
  /// Stale buckets that could not be removed
  pub failed: Vec<String>,
}

/// Claim every client and delete every bucket not named `version`.
///
/// Both halves run concurrently and both must finish. Individual bucket
/// deletions are independent; a failed one is logged and reported without
/// affecting the others.
pub async fn activate<S, C>(storage: &S, clients: &C, version: &str) -> Result<ActivationReport>
where
  S: CacheStorage + ?Sized,
  C: Clients + ?Sized,
{
  let (claimed, swept) = tokio::join!(clients.claim(version), sweep(storage, version));
  let (deleted, failed) = swept?;

  Ok(ActivationReport {
    claimed: claimed?,
    deleted,
    failed,
  })
}

async fn sweep<S>(storage: &S, version: &str) -> Result<(Vec<String>, Vec<String>)>
where
  S: CacheStorage + ?Sized,
{
  let stale: Vec<String> = storage
    .keys()
    .await?
    .into_iter()
    .filter(|name| name != version)
    .collect();

  let outcomes = join_all(stale.into_iter().map(|name| async move {
    info!("Deleting old cache {}", name);
    let outcome = storage.delete(&name).await;
    (name, outcome)
  }))
  .await;

  let mut deleted = Vec::new();
  let mut failed = Vec::new();
  for (name, outcome) in outcomes {
    match outcome {
      Ok(_) => deleted.push(name),
      Err(e) => {
        warn!("Could not delete old cache {}: {}", name, e);
        failed.push(name);
      }
    }
  }

  Ok((deleted, failed))
}
