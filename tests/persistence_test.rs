#![cfg(feature = "storage-rocksdb")]

use assert_cmd::cargo_bin;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

fn run(db_path: &std::path::Path, rows: &[&str]) -> String {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "action, from, to, amount").unwrap();
    for row in rows {
        writeln!(csv, "{row}").unwrap();
    }

    let output = Command::new(cargo_bin!("paychan"))
        .arg(csv.path())
        .arg("--db-path")
        .arg(db_path)
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_rocksdb_persistence_recovery() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run opens the ledger channel.
    let first = run(&db_path, &["fund, alice, bob, 8"]);
    assert_eq!(first.matches(",completed").count(), 2);

    // 2. The ledger is recovered, so a second one with bob is refused...
    let second = run(&db_path, &["fund, alice, bob, 8"]);
    assert!(second.contains("alice,DirectFunding-0x"));
    assert!(second.contains(",failed"));

    // 3. ...and it can still be closed cooperatively.
    let third = run(&db_path, &["defund, alice, bob,"]);
    assert_eq!(third.matches("DirectDefunding-0x").count(), 2);
    assert!(!third.contains(",failed"));
}
