//! Bucket storage traits and SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::traits::{CachedResponse, Registration, RequestKey};
use crate::net::ResponseType;
use crate::worker::WorkerState;

/// Trait for bucket storage backends.
///
/// A backend holds any number of named buckets, each a key to response map.
/// Implementations must tolerate concurrent calls from independent tasks.
#[async_trait]
pub trait CacheStorage: Send + Sync {
  /// Create the bucket if it does not exist yet.
  async fn open(&self, name: &str) -> Result<()>;

  /// Whether a bucket with this name exists.
  async fn has(&self, name: &str) -> Result<bool>;

  /// All bucket names, in creation order.
  async fn keys(&self) -> Result<Vec<String>>;

  /// Delete a bucket and every entry in it. Returns false if it did not exist.
  async fn delete(&self, name: &str) -> Result<bool>;

  /// Look up an entry. Only GET keys ever match; a missing bucket is a miss.
  async fn match_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Insert or overwrite an entry, opening the bucket if needed.
  /// Non-GET keys are rejected.
  async fn put(&self, bucket: &str, key: RequestKey, response: CachedResponse) -> Result<()>;

  /// Keys of every entry in a bucket, in insertion order.
  async fn entries(&self, bucket: &str) -> Result<Vec<RequestKey>>;
}

/// Trait for persisting which version is installed or active.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
  /// Lifecycle record for a version, if any.
  async fn registration(&self, version: &str) -> Result<Option<Registration>>;

  /// Record a state for a version. Recording `Activated` marks every other
  /// version `Redundant`.
  async fn record(&self, version: &str, state: WorkerState) -> Result<()>;

  /// The version currently in control, if any.
  async fn active_version(&self) -> Result<Option<String>>;
}

pub(crate) fn reject_non_get(key: &RequestKey) -> Result<()> {
  if key.is_get() {
    Ok(())
  } else {
    Err(eyre!(
      "Refusing to store {} {}: only GET requests can be cached",
      key.method(),
      key.url()
    ))
  }
}

/// SQLite-based bucket storage.
#[derive(Clone)]
pub struct SqliteStorage {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the storage at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory database, discarded when the last handle is dropped.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("swcache").join("cache.db"))
  }

  /// Run a closure against the connection on the blocking pool.
  async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let conn = Arc::clone(&self.conn);
    tokio::task::spawn_blocking(move || {
      let mut conn = conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
      f(&mut conn)
    })
    .await
    .map_err(|e| eyre!("Storage task failed: {}", e))?
  }
}

/// Schema for bucket tables.
const CACHE_SCHEMA: &str = r#"
-- Named buckets, one per cache version
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored responses
CREATE TABLE IF NOT EXISTS entries (
    bucket TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (bucket, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_bucket ON entries(bucket);

-- Lifecycle state per version
CREATE TABLE IF NOT EXISTS registrations (
    version TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

#[async_trait]
impl CacheStorage for SqliteStorage {
  async fn open(&self, name: &str) -> Result<()> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        conn
          .execute(
            "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
            params![name],
          )
          .map_err(|e| eyre!("Failed to open bucket {}: {}", name, e))?;
        Ok(())
      })
      .await
  }

  async fn has(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        let found: Option<i64> = conn
          .query_row(
            "SELECT 1 FROM buckets WHERE name = ?",
            params![name],
            |row| row.get(0),
          )
          .optional()
          .map_err(|e| eyre!("Failed to look up bucket {}: {}", name, e))?;
        Ok(found.is_some())
      })
      .await
  }

  async fn keys(&self) -> Result<Vec<String>> {
    self
      .with_conn(|conn| {
        let mut stmt = conn
          .prepare("SELECT name FROM buckets ORDER BY rowid")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

        let names = stmt
          .query_map([], |row| row.get(0))
          .map_err(|e| eyre!("Failed to list buckets: {}", e))?
          .collect::<rusqlite::Result<Vec<String>>>()
          .map_err(|e| eyre!("Failed to read bucket name: {}", e))?;

        Ok(names)
      })
      .await
  }

  async fn delete(&self, name: &str) -> Result<bool> {
    let name = name.to_string();
    self
      .with_conn(move |conn| {
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        tx.execute("DELETE FROM entries WHERE bucket = ?", params![name])
          .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
        let removed = tx
          .execute("DELETE FROM buckets WHERE name = ?", params![name])
          .map_err(|e| eyre!("Failed to delete bucket {}: {}", name, e))?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

        Ok(removed > 0)
      })
      .await
  }

  async fn match_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    if !key.is_get() {
      return Ok(None);
    }

    let bucket = bucket.to_string();
    let key_hash = key.cache_hash();
    self
      .with_conn(move |conn| {
        let row = conn
          .query_row(
            "SELECT response_url, status, headers, body, response_type, redirected, cached_at
             FROM entries WHERE bucket = ? AND key_hash = ?",
            params![bucket, key_hash],
            |row| {
              Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u16>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, bool>(5)?,
                row.get::<_, String>(6)?,
              ))
            },
          )
          .optional()
          .map_err(|e| eyre!("Failed to query entry: {}", e))?;

        let Some((url, status, headers, body, response_type, redirected, cached_at)) = row else {
          return Ok(None);
        };

        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let response_type = ResponseType::parse(&response_type)
          .ok_or_else(|| eyre!("Unknown response type '{}'", response_type))?;

        Ok(Some(CachedResponse {
          url,
          status,
          headers,
          body,
          response_type,
          redirected,
          cached_at: parse_datetime(&cached_at)?,
        }))
      })
      .await
  }

  async fn put(&self, bucket: &str, key: RequestKey, response: CachedResponse) -> Result<()> {
    reject_non_get(&key)?;

    let bucket = bucket.to_string();
    self
      .with_conn(move |conn| {
        let headers = serde_json::to_string(&response.headers)
          .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        tx.execute(
          "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
          params![bucket],
        )
        .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;

        tx.execute(
          "INSERT INTO entries
             (bucket, key_hash, method, url, response_url, status, headers, body, response_type, redirected, cached_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT (bucket, key_hash) DO UPDATE SET
             response_url = excluded.response_url,
             status = excluded.status,
             headers = excluded.headers,
             body = excluded.body,
             response_type = excluded.response_type,
             redirected = excluded.redirected,
             cached_at = excluded.cached_at",
          params![
            bucket,
            key.cache_hash(),
            key.method(),
            key.url(),
            response.url,
            response.status,
            headers,
            response.body,
            response.response_type.as_str(),
            response.redirected,
            response.cached_at.to_rfc3339(),
          ],
        )
        .map_err(|e| eyre!("Failed to store entry {}: {}", key.url(), e))?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

        Ok(())
      })
      .await
  }

  async fn entries(&self, bucket: &str) -> Result<Vec<RequestKey>> {
    let bucket = bucket.to_string();
    self
      .with_conn(move |conn| {
        let mut stmt = conn
          .prepare("SELECT method, url FROM entries WHERE bucket = ? ORDER BY rowid")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

        let keys = stmt
          .query_map(params![bucket], |row| {
            Ok(RequestKey::from_stored(row.get(0)?, row.get(1)?))
          })
          .map_err(|e| eyre!("Failed to list entries: {}", e))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| eyre!("Failed to read entry: {}", e))?;

        Ok(keys)
      })
      .await
  }
}

#[async_trait]
impl RegistrationStore for SqliteStorage {
  async fn registration(&self, version: &str) -> Result<Option<Registration>> {
    let version = version.to_string();
    self
      .with_conn(move |conn| {
        let row: Option<(String, String)> = conn
          .query_row(
            "SELECT state, updated_at FROM registrations WHERE version = ?",
            params![version],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()
          .map_err(|e| eyre!("Failed to query registration: {}", e))?;

        match row {
          Some((state, updated_at)) => Ok(Some(Registration {
            version,
            state: state.parse()?,
            updated_at: parse_datetime(&updated_at)?,
          })),
          None => Ok(None),
        }
      })
      .await
  }

  async fn record(&self, version: &str, state: WorkerState) -> Result<()> {
    let version = version.to_string();
    self
      .with_conn(move |conn| {
        let now = Utc::now().to_rfc3339();
        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

        if state == WorkerState::Activated {
          tx.execute(
            "UPDATE registrations SET state = ?, updated_at = ? WHERE version != ?",
            params![WorkerState::Redundant.as_str(), now, version],
          )
          .map_err(|e| eyre!("Failed to retire old registrations: {}", e))?;
        }

        tx.execute(
          "INSERT OR REPLACE INTO registrations (version, state, updated_at) VALUES (?, ?, ?)",
          params![version, state.as_str(), now],
        )
        .map_err(|e| eyre!("Failed to record registration: {}", e))?;

        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

        Ok(())
      })
      .await
  }

  async fn active_version(&self) -> Result<Option<String>> {
    self
      .with_conn(|conn| {
        conn
          .query_row(
            "SELECT version FROM registrations WHERE state = ? ORDER BY updated_at DESC LIMIT 1",
            params![WorkerState::Activated.as_str()],
            |row| row.get(0),
          )
          .optional()
          .map_err(|e| eyre!("Failed to query active version: {}", e))
      })
      .await
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
