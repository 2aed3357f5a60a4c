//! Cache version lifecycle: install, activate, then intercept fetches.
//!
//! A [`Worker`] owns everything a version needs as explicit context (version,
//! manifest, origin, storage, fetcher, clients) instead of ambient globals.

mod activator;
mod clients;
mod installer;
mod interceptor;
mod lifetime;
mod state;

pub use activator::ActivationReport;
pub use clients::{ClientRegistry, Clients};
pub use interceptor::{Interceptor, Source, StoreMode};
pub use lifetime::Lifetime;
pub use state::WorkerState;

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::cache::{Bucket, CacheStorage, RegistrationStore};
use crate::manifest::Manifest;
use crate::net::{Fetcher, Request, Response};

/// One cache version and the collaborators it runs against.
pub struct Worker<S, F, C>
where
  S: CacheStorage + RegistrationStore + 'static,
  F: Fetcher,
  C: Clients,
{
  manifest: Manifest,
  origin: Url,
  storage: Arc<S>,
  fetcher: Arc<F>,
  clients: Arc<C>,
  store_mode: StoreMode,
  state: WorkerState,
}

impl<S, F, C> Worker<S, F, C>
where
  S: CacheStorage + RegistrationStore + 'static,
  F: Fetcher,
  C: Clients,
{
  pub fn new(
    manifest: Manifest,
    origin: Url,
    storage: Arc<S>,
    fetcher: Arc<F>,
    clients: Arc<C>,
  ) -> Self {
    Self {
      manifest,
      origin,
      storage,
      fetcher,
      clients,
      store_mode: StoreMode::default(),
      state: WorkerState::Parsed,
    }
  }

  pub fn with_store_mode(mut self, store_mode: StoreMode) -> Self {
    self.store_mode = store_mode;
    self
  }

  pub fn version(&self) -> &str {
    self.manifest.version()
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Pick up the state recorded by an earlier run of this version.
  ///
  /// An `Installed` or `Activated` record is only trusted while the bucket
  /// still exists; anything else starts over from `Parsed`. A restored
  /// `Installed` version asks to skip waiting again, as its install did.
  pub async fn restore(&mut self) -> Result<WorkerState> {
    let recorded = self.storage.registration(self.version()).await?;
    let bucket_exists = self.storage.has(self.version()).await?;

    self.state = match recorded.map(|r| r.state) {
      Some(state @ (WorkerState::Installed | WorkerState::Activated)) if bucket_exists => state,
      _ => WorkerState::Parsed,
    };

    if self.state == WorkerState::Installed {
      self.clients.skip_waiting().await?;
    }
    Ok(self.state)
  }

  /// Populate this version's bucket from the manifest.
  ///
  /// On failure the version is marked `Redundant` and the error returned;
  /// running `install` again retries from scratch.
  pub async fn install(&mut self) -> Result<usize> {
    self.transition(WorkerState::Installing).await?;

    match self.try_install().await {
      Ok(stored) => {
        self.transition(WorkerState::Installed).await?;
        info!("Installed {} with {} assets", self.version(), stored);
        Ok(stored)
      }
      Err(e) => {
        warn!("Install of {} failed: {}", self.version(), e);
        self.transition(WorkerState::Redundant).await?;
        Err(e)
      }
    }
  }

  async fn try_install(&self) -> Result<usize> {
    let assets = self.manifest.resolve(&self.origin)?;
    let bucket = Bucket::open(Arc::clone(&self.storage), self.version()).await?;
    installer::install(&bucket, assets, self.fetcher.as_ref(), self.clients.as_ref()).await
  }

  /// Take over from the previous version. Requires a completed install.
  ///
  /// If clients cannot be claimed or buckets cannot be listed the version is
  /// marked `Redundant`; `start` then installs it again.
  pub async fn activate(&mut self) -> Result<ActivationReport> {
    if self.state != WorkerState::Installed {
      return Err(eyre!(
        "Cannot activate {} while {}",
        self.version(),
        self.state
      ));
    }
    self.transition(WorkerState::Activating).await?;

    let outcome =
      activator::activate(self.storage.as_ref(), self.clients.as_ref(), self.version()).await;
    let report = match outcome {
      Ok(report) => report,
      Err(e) => {
        warn!("Activation of {} failed: {}", self.version(), e);
        self.transition(WorkerState::Redundant).await?;
        return Err(e);
      }
    };

    self.transition(WorkerState::Activated).await?;
    info!(
      "Activated {}: claimed {} clients, removed {} old caches",
      self.version(),
      report.claimed,
      report.deleted.len()
    );
    Ok(report)
  }

  /// Install, then activate unless clients of another version must be
  /// waited out. Does nothing when this version is already active.
  pub async fn start(&mut self) -> Result<WorkerState> {
    if self.state == WorkerState::Activated {
      return Ok(self.state);
    }

    if self.state != WorkerState::Installed {
      self.install().await?;
    }

    let waiting_on = self.clients.controlled_by_other(self.version()).await?;
    if self.clients.skip_waiting_requested() || waiting_on == 0 {
      self.activate().await?;
    } else {
      info!(
        "{} installed, waiting for {} clients of the previous version",
        self.version(),
        waiting_on
      );
    }

    Ok(self.state)
  }

  /// Handle one intercepted request.
  ///
  /// Work that outlives the response is registered on `lifetime`; settle it
  /// once the response has been delivered.
  pub async fn handle_fetch(
    &self,
    request: Request,
    lifetime: &mut Lifetime,
  ) -> Result<(Response, Source)> {
    if self.state != WorkerState::Activated {
      return Err(eyre!(
        "{} is {}, not ready to handle fetches",
        self.version(),
        self.state
      ));
    }

    self.interceptor().handle(request, lifetime).await
  }

  /// Handle one request and wait for everything it scheduled.
  #[allow(dead_code)]
  pub async fn fetch(&self, request: Request) -> Result<(Response, Source)> {
    let mut lifetime = Lifetime::new();
    let result = self.handle_fetch(request, &mut lifetime).await;
    lifetime.settle().await?;
    result
  }

  fn interceptor(&self) -> Interceptor<S, F> {
    Interceptor::new(
      Bucket::new(Arc::clone(&self.storage), self.version()),
      Arc::clone(&self.fetcher),
      self.store_mode,
    )
  }

  async fn transition(&mut self, next: WorkerState) -> Result<()> {
    self.state.advance(next)?;
    self.storage.record(self.version(), next).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, SqliteStorage};
  use crate::testing::{url, ScriptedFetcher, ORIGIN};

  fn manifest() -> Manifest {
    Manifest::new(
      "v2",
      vec![
        "./".to_string(),
        "./index.html".to_string(),
        "./icon.png".to_string(),
      ],
    )
    .unwrap()
  }

  fn fetcher() -> ScriptedFetcher {
    ScriptedFetcher::new()
      .ok("./", b"<html>root</html>")
      .ok("./index.html", b"<html>index</html>")
      .ok("./icon.png", b"png")
      .ok("./new-asset.png", b"new")
  }

  fn worker<S>(
    storage: Arc<S>,
    fetcher: Arc<ScriptedFetcher>,
  ) -> Worker<S, ScriptedFetcher, ClientRegistry>
  where
    S: CacheStorage + RegistrationStore + 'static,
  {
    Worker::new(
      manifest(),
      Url::parse(ORIGIN).unwrap(),
      storage,
      fetcher,
      Arc::new(ClientRegistry::new()),
    )
  }

  #[tokio::test]
  async fn test_full_cycle_scenario() {
    let storage = Arc::new(MemoryStorage::new());
    storage.open("v1").await.unwrap();
    let fetcher = Arc::new(fetcher());
    let mut worker = worker(Arc::clone(&storage), Arc::clone(&fetcher));

    worker.install().await.unwrap();
    assert_eq!(storage.entries("v2").await.unwrap().len(), 3);

    worker.activate().await.unwrap();
    assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);

    let before = fetcher.calls();
    let (icon, source) = worker.fetch(Request::get(url("./icon.png"))).await.unwrap();
    assert_eq!(source, Source::Cache);
    assert_eq!(icon.body(), b"png");
    assert_eq!(fetcher.calls(), before);

    let (fresh, source) = worker
      .fetch(Request::get(url("./new-asset.png")))
      .await
      .unwrap();
    assert_eq!(source, Source::Network);
    assert_eq!(fresh.body(), b"new");
    assert_eq!(storage.entries("v2").await.unwrap().len(), 4);

    let (again, source) = worker
      .fetch(Request::get(url("./new-asset.png")))
      .await
      .unwrap();
    assert_eq!(source, Source::Cache);
    assert_eq!(again.body(), b"new");
    assert_eq!(fetcher.calls_for("./new-asset.png"), 1);
  }

  #[tokio::test]
  async fn test_failed_install_is_redundant_and_blocks_activation() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(ScriptedFetcher::new().ok("./", b"root"));
    let mut worker = worker(Arc::clone(&storage), fetcher);

    assert!(worker.install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(worker.activate().await.is_err());

    let recorded = storage.registration("v2").await.unwrap().unwrap();
    assert_eq!(recorded.state, WorkerState::Redundant);
  }

  #[tokio::test]
  async fn test_fetch_before_activation_is_refused() {
    let storage = Arc::new(MemoryStorage::new());
    let mut worker = worker(storage, Arc::new(fetcher()));
    worker.install().await.unwrap();

    assert!(worker.fetch(Request::get(url("./icon.png"))).await.is_err());
  }

  #[tokio::test]
  async fn test_start_activates_and_is_idempotent() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(fetcher());
    let mut worker = worker(Arc::clone(&storage), Arc::clone(&fetcher));

    assert_eq!(worker.start().await.unwrap(), WorkerState::Activated);
    let calls = fetcher.calls();
    assert_eq!(worker.start().await.unwrap(), WorkerState::Activated);

    assert_eq!(fetcher.calls(), calls);
    assert_eq!(storage.active_version().await.unwrap().as_deref(), Some("v2"));
  }

  #[tokio::test]
  async fn test_blocked_clients_waited_out_without_skip_waiting() {
    // A host that ignores skip_waiting keeps the new version installed
    // while an old client is still open.
    struct StubbornClients(ClientRegistry);

    #[async_trait::async_trait]
    impl Clients for StubbornClients {
      async fn claim(&self, version: &str) -> Result<usize> {
        self.0.claim(version).await
      }
      async fn skip_waiting(&self) -> Result<()> {
        Ok(())
      }
      fn skip_waiting_requested(&self) -> bool {
        false
      }
      async fn controlled_by_other(&self, version: &str) -> Result<usize> {
        self.0.controlled_by_other(version).await
      }
    }

    let registry = ClientRegistry::new();
    registry.connect("tab-1", Some("v1")).unwrap();
    let mut worker = Worker::new(
      manifest(),
      Url::parse(ORIGIN).unwrap(),
      Arc::new(MemoryStorage::new()),
      Arc::new(fetcher()),
      Arc::new(StubbornClients(registry)),
    );

    assert_eq!(worker.start().await.unwrap(), WorkerState::Installed);
    assert_eq!(worker.start().await.unwrap(), WorkerState::Installed);
  }

  #[tokio::test]
  async fn test_restore_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let storage = Arc::new(SqliteStorage::open_at(&path).unwrap());
      let mut worker = worker(storage, Arc::new(fetcher()));
      worker.start().await.unwrap();
    }

    let storage = Arc::new(SqliteStorage::open_at(&path).unwrap());
    let fetcher = Arc::new(fetcher());
    fetcher.set_offline(true);
    let mut worker = worker(storage, Arc::clone(&fetcher));

    assert_eq!(worker.restore().await.unwrap(), WorkerState::Activated);
    let (index, source) = worker
      .fetch(Request::get(url("./index.html")))
      .await
      .unwrap();
    assert_eq!(source, Source::Cache);
    assert_eq!(index.body(), b"<html>index</html>");
    assert_eq!(fetcher.calls(), 0);
  }

  #[tokio::test]
  async fn test_restore_ignores_record_without_bucket() {
    let storage = Arc::new(MemoryStorage::new());
    storage.record("v2", WorkerState::Activated).await.unwrap();
    let mut worker = worker(storage, Arc::new(fetcher()));

    assert_eq!(worker.restore().await.unwrap(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_version_bump_sweeps_previous_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(fetcher());

    let mut old = Worker::new(
      Manifest::new("v1", vec!["./".to_string()]).unwrap(),
      Url::parse(ORIGIN).unwrap(),
      Arc::clone(&storage),
      Arc::clone(&fetcher),
      Arc::new(ClientRegistry::new()),
    );
    old.start().await.unwrap();

    let mut new = worker(Arc::clone(&storage), fetcher);
    new.start().await.unwrap();

    assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);
    let retired = storage.registration("v1").await.unwrap().unwrap();
    assert_eq!(retired.state, WorkerState::Redundant);
  }

  #[tokio::test]
  async fn test_install_then_start_in_separate_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let fetcher = Arc::new(fetcher());

    // Each run registers itself as a client of whichever version is active
    let run = |version: &str| {
      let storage = Arc::new(SqliteStorage::open_at(&path).unwrap());
      let clients = Arc::new(ClientRegistry::new());
      let manifest = Manifest::new(version, vec!["./".to_string(), "./icon.png".to_string()]);
      (storage, clients, manifest.unwrap())
    };

    let (storage, clients, manifest) = run("v1");
    let origin = Url::parse(ORIGIN).unwrap();
    let mut v1 = Worker::new(manifest, origin.clone(), storage, Arc::clone(&fetcher), clients);
    assert_eq!(v1.start().await.unwrap(), WorkerState::Activated);

    let (storage, clients, manifest) = run("v2");
    clients.connect("cli", Some("v1")).unwrap();
    let mut v2 = Worker::new(manifest, origin.clone(), storage, Arc::clone(&fetcher), clients);
    v2.restore().await.unwrap();
    v2.install().await.unwrap();
    drop(v2);

    let (storage, clients, manifest) = run("v2");
    clients.connect("cli", Some("v1")).unwrap();
    let mut v2 = Worker::new(
      manifest,
      origin,
      Arc::clone(&storage),
      Arc::clone(&fetcher),
      clients,
    );
    assert_eq!(v2.restore().await.unwrap(), WorkerState::Installed);
    assert_eq!(v2.start().await.unwrap(), WorkerState::Activated);

    let (icon, source) = v2.fetch(Request::get(url("./icon.png"))).await.unwrap();
    assert_eq!(source, Source::Cache);
    assert_eq!(icon.body(), b"png");
    assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);
  }

  #[tokio::test]
  async fn test_failed_activation_is_redundant_and_retried_by_start() {
    struct FlakyClaim {
      inner: ClientRegistry,
      fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Clients for FlakyClaim {
      async fn claim(&self, version: &str) -> Result<usize> {
        if self.fail.swap(false, std::sync::atomic::Ordering::SeqCst) {
          return Err(eyre!("claim refused"));
        }
        self.inner.claim(version).await
      }
      async fn skip_waiting(&self) -> Result<()> {
        self.inner.skip_waiting().await
      }
      fn skip_waiting_requested(&self) -> bool {
        self.inner.skip_waiting_requested()
      }
      async fn controlled_by_other(&self, version: &str) -> Result<usize> {
        self.inner.controlled_by_other(version).await
      }
    }

    let storage = Arc::new(MemoryStorage::new());
    let mut worker = Worker::new(
      manifest(),
      Url::parse(ORIGIN).unwrap(),
      Arc::clone(&storage),
      Arc::new(fetcher()),
      Arc::new(FlakyClaim {
        inner: ClientRegistry::new(),
        fail: std::sync::atomic::AtomicBool::new(true),
      }),
    );

    worker.install().await.unwrap();
    assert!(worker.activate().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
    let recorded = storage.registration("v2").await.unwrap().unwrap();
    assert_eq!(recorded.state, WorkerState::Redundant);

    assert_eq!(worker.start().await.unwrap(), WorkerState::Activated);
  }
}
