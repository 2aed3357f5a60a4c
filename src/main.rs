mod cache;
mod config;
mod logging;
mod manifest;
mod net;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

use cache::{Bucket, CacheStorage, MemoryStorage, Registration, RegistrationStore, SqliteStorage};
use config::Config;
use net::{ReqwestFetcher, Request, Response};
use worker::{ClientRegistry, Lifetime, Source, Worker, WorkerState};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Versioned offline asset cache with cache-or-fetch interception")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Cache version identifier to use instead of the configured one
  #[arg(long)]
  version_id: Option<String>,

  /// Origin the app is served from
  #[arg(short, long)]
  origin: Option<Url>,

  /// Keep buckets in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-populate the current version's bucket from the asset manifest
  Install,
  /// Delete stale buckets and take control (requires a completed install)
  Activate,
  /// Install and activate
  Start,
  /// Show the lifecycle state of the current version
  Status,
  /// Request URLs through the cache, starting the current version if needed
  Fetch {
    /// URLs, absolute or relative to the origin
    #[arg(required = true)]
    urls: Vec<String>,

    /// Write the response body to this file (single URL only)
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,
  },
  /// List bucket names; the current one is marked with *
  Buckets,
  /// List entries of a bucket (default: current version)
  Entries { bucket: Option<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = logging::init()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Command line overrides
  let config = Config {
    version: args.version_id.unwrap_or(config.version),
    origin: args.origin.or(config.origin),
    ..config
  };

  if args.ephemeral {
    run(args.command, config, MemoryStorage::new()).await
  } else {
    let storage = match &config.database {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open()?,
    };
    run(args.command, config, storage).await
  }
}

async fn run<S>(command: Command, config: Config, storage: S) -> Result<()>
where
  S: CacheStorage + RegistrationStore + 'static,
{
  let storage = Arc::new(storage);
  let origin = config.origin()?;
  let fetcher = Arc::new(ReqwestFetcher::new(origin.clone())?);

  // This process is itself a client of whichever version is active
  let clients = Arc::new(ClientRegistry::new());
  let active = storage.active_version().await?;
  clients.connect("cli", active.as_deref())?;

  let mut worker = Worker::new(
    config.manifest()?,
    origin.clone(),
    Arc::clone(&storage),
    fetcher,
    clients,
  )
  .with_store_mode(config.store_mode);
  let restored = worker.restore().await?;

  match command {
    Command::Install => {
      if restored == WorkerState::Parsed {
        let stored = worker.install().await?;
        println!("Installed {} ({} assets)", worker.version(), stored);
      } else {
        println!("{} is already {}", worker.version(), restored);
      }
    }
    Command::Activate => match restored {
      WorkerState::Installed => {
        let report = worker.activate().await?;
        println!(
          "Activated {} (claimed {} clients, removed {} old caches)",
          worker.version(),
          report.claimed,
          report.deleted.len()
        );
        for name in &report.failed {
          println!("  could not remove {}", name);
        }
      }
      WorkerState::Activated => println!("{} is already active", worker.version()),
      _ => {
        return Err(eyre!(
          "{} is not installed; run `swcache install` first",
          worker.version()
        ))
      }
    },
    Command::Start => {
      let state = worker.start().await?;
      println!("{} is {}", worker.version(), state);
    }
    Command::Status => {
      println!("version: {}", worker.version());
      match storage.registration(worker.version()).await? {
        Some(Registration {
          state, updated_at, ..
        }) => println!("state: {} (since {})", state, updated_at.to_rfc3339()),
        None => println!("state: {}", restored),
      }
      println!("active: {}", active.as_deref().unwrap_or("none"));
    }
    Command::Fetch { urls, output } => {
      if output.is_some() && urls.len() != 1 {
        return Err(eyre!("--output takes exactly one URL"));
      }
      if worker.state() != WorkerState::Activated {
        worker.start().await?;
      }

      for raw in urls {
        let target = origin
          .join(&raw)
          .map_err(|e| eyre!("Invalid URL {}: {}", raw, e))?;

        let mut lifetime = Lifetime::new();
        let result = worker
          .handle_fetch(Request::get(target), &mut lifetime)
          .await;

        // Deliver first, then let the cache write finish
        let delivered = deliver(result, output.as_deref());
        lifetime.settle().await?;
        delivered?;
      }
    }
    Command::Buckets => {
      for name in storage.keys().await? {
        let marker = if name == worker.version() { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
    Command::Entries { bucket } => {
      let name = bucket.unwrap_or_else(|| worker.version().to_string());
      for key in Bucket::new(Arc::clone(&storage), name).keys().await? {
        println!("{} {}", key.method(), key.url());
      }
    }
  }

  Ok(())
}

fn deliver(result: Result<(Response, Source)>, output: Option<&Path>) -> Result<()> {
  let (response, source) = result?;
  let source = match source {
    Source::Cache => "cache",
    Source::Network => "network",
  };

  println!(
    "{} {} {} ({} bytes)",
    response.status().as_u16(),
    source,
    response.url(),
    response.body().len()
  );

  if let Some(path) = output {
    std::fs::write(path, response.into_body())
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
  }

  Ok(())
}
