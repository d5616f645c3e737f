//! `kcache` CLI against cache files on disk.

use std::path::Path;
use std::process::Command;

use kcache::{CacheKey, GeneratorSignature, OpenMode, PersistentStore, StoreLocation};
use tempfile::TempDir;

const KCACHE: &str = env!("CARGO_BIN_EXE_kcache");

fn table_names(path: &Path) -> Vec<String> {
    let conn = rusqlite::Connection::open(path).unwrap();
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    names
}

#[test]
fn test_export_then_merge() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("user.db");
    let key = CacheKey::new("kernel_a", "gfx900", 50000000, GeneratorSignature::of(b"v1"));
    PersistentStore::open(StoreLocation::File(db.clone()), OpenMode::ReadWrite)
        .unwrap()
        .put(&key, b"code")
        .unwrap();

    let snapshot = temp_dir.path().join("snapshot.db");
    let status = Command::new(KCACHE)
        .args(["export", "--db"])
        .arg(&db)
        .arg("-o")
        .arg(&snapshot)
        .status()
        .unwrap();
    assert!(status.success());

    let combined = temp_dir.path().join("out").join("combined.db");
    let status = Command::new(KCACHE)
        .args(["merge", "--db"])
        .arg(&combined)
        .arg(&snapshot)
        .status()
        .unwrap();
    assert!(status.success());

    let store = PersistentStore::open(StoreLocation::File(combined), OpenMode::ReadOnly).unwrap();
    assert_eq!(store.get(&key).unwrap(), Some(b"code".to_vec()));
}

#[test]
fn test_export_leaves_foreign_database_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let db = temp_dir.path().join("other.db");
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE unrelated (x INTEGER)")
        .unwrap();

    let output = Command::new(KCACHE)
        .args(["export", "--db"])
        .arg(&db)
        .arg("-o")
        .arg(temp_dir.path().join("snapshot.db"))
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert_eq!(table_names(&db), vec!["unrelated".to_string()]);
}
