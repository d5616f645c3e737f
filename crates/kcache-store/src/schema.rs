//! SQL text for the `cache_v1` table.
//!
//! Later schema versions must add tables or columns rather than alter these,
//! so older readers keep working against newer files.

pub(crate) const TABLE: &str = "cache_v1";

/// Columns every reader relies on. Newer files may carry more.
pub(crate) const COLUMNS: &[&str] = &[
    "kernel_name",
    "arch",
    "runtime_version",
    "generator_sum",
    "code",
    "timestamp",
];

pub(crate) const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS cache_v1 (
    kernel_name TEXT NOT NULL,
    arch TEXT NOT NULL,
    runtime_version INTEGER NOT NULL,
    generator_sum BLOB NOT NULL,
    code BLOB NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (kernel_name, arch, runtime_version, generator_sum)
)";

pub(crate) const GET: &str = "SELECT code FROM cache_v1
    WHERE kernel_name = ?1
      AND arch = ?2
      AND runtime_version = ?3
      AND generator_sum = ?4";

pub(crate) const PUT: &str = "INSERT OR REPLACE INTO cache_v1 (
    kernel_name, arch, runtime_version, generator_sum, code, timestamp
) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

pub(crate) const LIST: &str = "SELECT kernel_name, arch, runtime_version, generator_sum,
        length(code), timestamp
    FROM cache_v1
    ORDER BY kernel_name, arch, runtime_version";

pub(crate) const COUNT: &str = "SELECT count(*) FROM cache_v1";

/// Upsert everything from an attached snapshot named `incoming`.
///
/// Rows whose signature is not exactly 32 bytes are not valid keys and are
/// skipped.
pub(crate) const MERGE_FROM_INCOMING: &str = "INSERT OR REPLACE INTO main.cache_v1 (
    kernel_name, arch, runtime_version, generator_sum, timestamp, code
)
SELECT kernel_name, arch, runtime_version, generator_sum, timestamp, code
FROM incoming.cache_v1
WHERE length(generator_sum) = 32";

pub(crate) const INCOMING_HAS_TABLE: &str =
    "SELECT count(*) FROM incoming.sqlite_master WHERE type = 'table' AND name = 'cache_v1'";

pub(crate) const INCOMING_COLUMNS: &str = "PRAGMA incoming.table_info(cache_v1)";
