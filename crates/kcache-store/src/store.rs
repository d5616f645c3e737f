//! The store handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use kcache_key::{CacheKey, GeneratorSignature};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::schema;

/// How long a writer waits for a competing writer on the same file.
///
/// Mass precompilation runs many processes against one file, so this is
/// generous.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a store's data lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A database file on disk
    File(PathBuf),
    /// A private in-memory database, gone when the handle is dropped
    Memory,
}

impl StoreLocation {
    /// Interpret a configured path. Empty and `:memory:` mean in-memory.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.as_os_str().is_empty() || path == Path::new(":memory:") {
            Self::Memory
        } else {
            Self::File(path.to_path_buf())
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory => f.write_str(":memory:"),
        }
    }
}

/// Access mode for a store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Metadata about one stored entry (payload excluded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub key: CacheKey,
    /// Size of the code object in bytes
    pub code_size: u64,
    /// When the entry was last written
    pub created_at: Option<DateTime<Utc>>,
}

/// One open connection to one tier's backing database.
pub struct PersistentStore {
    location: StoreLocation,
    mode: OpenMode,
    conn: Mutex<Connection>,
    /// Serializes snapshot imports.
    merge_lock: Mutex<()>,
}

impl fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStore")
            .field("location", &self.location)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl PersistentStore {
    /// Open a store with the default busy timeout.
    pub fn open(location: StoreLocation, mode: OpenMode) -> StoreResult<Self> {
        Self::open_with_timeout(location, mode, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open a store.
    ///
    /// A read-write open creates the file and the table if missing. A
    /// read-only open never creates anything and fails unless the table is
    /// queryable, so a corrupt or foreign file is rejected here rather than on
    /// every lookup.
    pub fn open_with_timeout(
        location: StoreLocation,
        mode: OpenMode,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        let flags = match mode {
            OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        } | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let open_err = |source| StoreError::Open {
            location: location.to_string(),
            source,
        };

        let conn = match &location {
            StoreLocation::File(path) => Connection::open_with_flags(path, flags),
            StoreLocation::Memory => Connection::open_in_memory_with_flags(flags),
        }
        .map_err(open_err)?;

        conn.busy_timeout(busy_timeout).map_err(open_err)?;

        match mode {
            OpenMode::ReadWrite => {
                conn.execute_batch(schema::CREATE_TABLE).map_err(open_err)?;
            }
            OpenMode::ReadOnly => {
                conn.prepare(schema::GET).map_err(open_err)?;
            }
        }

        tracing::debug!(%location, ?mode, "opened kernel cache store");

        Ok(Self {
            location,
            mode,
            conn: Mutex::new(conn),
            merge_lock: Mutex::new(()),
        })
    }

    /// Open a private in-memory read-write store.
    pub fn in_memory() -> StoreResult<Self> {
        Self::open(StoreLocation::Memory, OpenMode::ReadWrite)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.mode == OpenMode::ReadOnly
    }

    /// Look up the code object stored under `key`.
    pub fn get(&self, key: &CacheKey) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(schema::GET)?;
        let code = stmt
            .query_row(
                params![
                    key.kernel_name,
                    key.target_arch,
                    key.runtime_version,
                    key.generator_signature.as_bytes().as_slice(),
                ],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(code)
    }

    /// Insert or replace the entry for `key`, stamping the current time.
    pub fn put(&self, key: &CacheKey, code: &[u8]) -> StoreResult<()> {
        self.ensure_writable()?;
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(schema::PUT)?;
        stmt.execute(params![
            key.kernel_name,
            key.target_arch,
            key.runtime_version,
            key.generator_signature.as_bytes().as_slice(),
            code,
            Utc::now().timestamp(),
        ])?;
        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row(schema::COUNT, [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// List every entry's key and size, ordered by key.
    ///
    /// Rows with a malformed signature are skipped with a warning.
    pub fn entries(&self) -> StoreResult<Vec<EntryInfo>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(schema::LIST)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (kernel_name, arch, runtime_version, sum, code_size, timestamp) = row?;
            let signature = match GeneratorSignature::from_slice(&sum) {
                Ok(sig) => sig,
                Err(e) => {
                    tracing::warn!(
                        location = %self.location,
                        kernel = %kernel_name,
                        "skipping entry with malformed signature: {}",
                        e
                    );
                    continue;
                }
            };
            entries.push(EntryInfo {
                key: CacheKey::new(kernel_name, arch, runtime_version, signature),
                code_size: code_size.max(0) as u64,
                created_at: Utc.timestamp_opt(timestamp, 0).single(),
            });
        }
        Ok(entries)
    }

    pub(crate) fn ensure_writable(&self) -> StoreResult<()> {
        if self.is_read_only() {
            return Err(StoreError::ReadOnly(self.location.to_string()));
        }
        Ok(())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_merge(&self) -> MutexGuard<'_, ()> {
        self.merge_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
