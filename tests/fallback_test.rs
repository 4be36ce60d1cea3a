use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

const FALLBACK_WARNING: &str = "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage.";

fn saga_command(db_path: &std::path::Path) -> Command {
    let mut cmd = Command::new(cargo_bin!("collection-saga"));
    cmd.arg("tests/fixtures/script.csv")
        .arg("--categories")
        .arg("tests/fixtures/categories.csv")
        .arg("--collectors")
        .arg("tests/fixtures/collectors.csv")
        .arg("--db-path")
        .arg(db_path);
    cmd
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();

    saga_command(&dir.path().join("some_db"))
        .assert()
        .success()
        .stderr(predicate::str::contains(FALLBACK_WARNING));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let dir = tempfile::tempdir().unwrap();

    saga_command(&dir.path().join("test_db"))
        .assert()
        .success()
        .stderr(predicate::str::contains(FALLBACK_WARNING).not());
}
