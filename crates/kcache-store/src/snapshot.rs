//! Snapshot export and import.
//!
//! An exported snapshot is a plain SQLite database file image produced with
//! `VACUUM INTO`. Importing writes the image to a scratch file, attaches it as
//! `incoming`, upserts its rows and detaches it again.

use std::fs;

use rusqlite::{params, Connection, ErrorCode};

use crate::error::{StoreError, StoreResult};
use crate::schema;
use crate::store::PersistentStore;

/// Every SQLite database file starts with this header.
const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

impl PersistentStore {
    /// Produce a self-contained image of the store's current contents.
    pub fn snapshot(&self) -> StoreResult<Vec<u8>> {
        let scratch = tempfile::tempdir()?;
        let path = scratch.path().join("snapshot.db");

        {
            let conn = self.lock();
            conn.execute("VACUUM INTO ?1", params![path.to_string_lossy().into_owned()])?;
        }

        let image = fs::read(&path)?;
        tracing::debug!(
            location = %self.location(),
            bytes = image.len(),
            "exported cache snapshot"
        );
        Ok(image)
    }

    /// Upsert every entry of a snapshot image into this store.
    ///
    /// Entries not present in the image are left alone. Returns the number of
    /// rows written. An image that is not a kernel cache database fails with
    /// [`StoreError::InvalidSnapshot`] and changes nothing.
    pub fn merge(&self, image: &[u8]) -> StoreResult<usize> {
        self.ensure_writable()?;
        if !image.starts_with(SQLITE_HEADER) {
            return Err(StoreError::InvalidSnapshot(
                "missing SQLite database header".to_string(),
            ));
        }

        let _merging = self.lock_merge();

        let scratch = tempfile::tempdir()?;
        let path = scratch.path().join("incoming.db");
        fs::write(&path, image)?;

        let conn = self.lock();
        conn.execute("ATTACH DATABASE ?1 AS incoming", params![path.to_string_lossy().into_owned()])?;

        let merged = merge_attached(&conn);

        if let Err(e) = conn.execute_batch("DETACH DATABASE incoming") {
            tracing::warn!(location = %self.location(), "failed to detach snapshot: {}", e);
        }

        let merged = merged?;
        tracing::debug!(location = %self.location(), rows = merged, "merged cache snapshot");
        Ok(merged)
    }
}

fn merge_attached(conn: &Connection) -> StoreResult<usize> {
    let tables: i64 = conn
        .query_row(schema::INCOMING_HAS_TABLE, [], |row| row.get(0))
        .map_err(|e| StoreError::InvalidSnapshot(e.to_string()))?;
    if tables == 0 {
        return Err(StoreError::InvalidSnapshot(format!(
            "snapshot has no {} table",
            schema::TABLE
        )));
    }

    let columns = {
        let mut stmt = conn
            .prepare(schema::INCOMING_COLUMNS)
            .map_err(invalid_image)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(invalid_image)?;
        names.collect::<Result<Vec<_>, _>>().map_err(invalid_image)?
    };
    let missing: Vec<&str> = schema::COLUMNS
        .iter()
        .copied()
        .filter(|wanted| !columns.iter().any(|c| c == wanted))
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::InvalidSnapshot(format!(
            "{} table lacks column(s): {}",
            schema::TABLE,
            missing.join(", ")
        )));
    }

    conn.execute(schema::MERGE_FROM_INCOMING, [])
        .map_err(invalid_image)
}

/// Damage in the attached image is the snapshot's fault, not the store's.
fn invalid_image(e: rusqlite::Error) -> StoreError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase) => {
            StoreError::InvalidSnapshot(e.to_string())
        }
        _ => StoreError::Sqlite(e),
    }
}
