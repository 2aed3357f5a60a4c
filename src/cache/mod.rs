//! Versioned response buckets.
//!
//! This module provides the storage side of the offline cache:
//! - Named buckets, one per cache version, each mapping request identity to a response
//! - A SQLite backend for persistence across runs and an in-memory one for tests
//! - The cacheability classification applied to network results

mod bucket;
mod memory;
pub mod policy;
mod storage;
mod traits;

pub use bucket::Bucket;
pub use memory::MemoryStorage;
pub use storage::{CacheStorage, RegistrationStore, SqliteStorage};
pub use traits::{CachedResponse, Registration, RequestKey};
