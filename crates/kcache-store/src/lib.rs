//! Persistent store for compiled kernels
//!
//! A single-file embedded SQLite database holding one table keyed by the four
//! [`CacheKey`](kcache_key::CacheKey) fields. One [`PersistentStore`] owns one
//! connection to one backing file (or to an in-memory database).
//!
//! ## Concurrency
//!
//! - Every query on a handle runs under that handle's mutex. Independent
//!   handles (user tier vs. system tier) never block each other.
//! - Handles in different processes sharing a file rely on SQLite's busy
//!   timeout: a writer waits up to [`DEFAULT_BUSY_TIMEOUT`] for a competing
//!   writer instead of failing.
//! - Snapshot imports take a second, dedicated mutex so concurrent merges cannot
//!   interleave their attach/merge/detach sequences.
//!
//! ## Snapshots
//!
//! [`PersistentStore::snapshot`] returns a complete SQLite database image.
//! [`PersistentStore::merge`] upserts every entry of such an image, leaving
//! entries absent from it untouched.

mod error;
mod schema;
mod snapshot;
mod store;

pub use error::{StoreError, StoreResult};
pub use store::{EntryInfo, OpenMode, PersistentStore, StoreLocation, DEFAULT_BUSY_TIMEOUT};
