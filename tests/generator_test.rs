use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

#[test]
fn test_generate_operations_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generated.csv");
    common::generate_operations_csv(&path, 5).expect("Failed to generate CSV");

    let content = std::fs::read_to_string(&path).expect("Failed to read file");
    // Header + 5 rows = 6 lines
    assert_eq!(content.lines().count(), 6);
}

#[test]
fn test_many_operations_stream_through() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("many.csv");
    common::generate_operations_csv(&path, 2_000).expect("Failed to generate CSV");

    let mut cmd = Command::new(cargo_bin!("creator-ledger"));
    cmd.arg(&path);

    // 2,000 tips of 1.00 at 5%
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("creator,1900,0,1900,USD,false"));
}
