use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn scenario(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "action, from, to, amount").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file
}

#[test]
fn test_cli_end_to_end() {
    let file = scenario(&[
        "fund, alice, bob, 10",
        "pay, alice, bob, 4",
        "pay, alice, bob, 1.5",
        "defund, alice, bob,",
    ]);

    let mut cmd = Command::new(cargo_bin!("paychan"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("party,objective,outcome"))
        .stdout(predicate::str::contains("alice,DirectFunding-0x").count(1))
        .stdout(predicate::str::contains("bob,DirectFunding-0x").count(1))
        .stdout(predicate::str::contains(",voucher").count(2))
        .stdout(predicate::str::contains("DirectDefunding-0x").count(2))
        .stdout(predicate::str::contains("failed").not());
}

#[test]
fn test_malformed_rows_are_skipped() {
    let file = scenario(&[
        "teleport, alice, bob, 1",
        "fund, alice, bob, not_a_number",
        "fund, alice, bob, 3",
    ]);

    let mut cmd = Command::new(cargo_bin!("paychan"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error reading action").count(2))
        .stdout(predicate::str::contains(",completed").count(2));
}

#[test]
fn test_invalid_actions_are_reported() {
    let file = scenario(&[
        "pay, alice, bob, 1",
        "fund, alice, alice, 1",
        "fund, alice, bob,",
    ]);

    let mut cmd = Command::new(cargo_bin!("paychan"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Error processing action").count(3))
        .stdout(predicate::eq("party,objective,outcome\n"));
}

#[test]
fn test_payee_cannot_pay() {
    let file = scenario(&["fund, alice, bob, 2", "pay, bob, alice, 1"]);

    let mut cmd = Command::new(cargo_bin!("paychan"));
    cmd.arg(file.path());

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("is not the payer"))
        .stdout(predicate::str::contains(",voucher").not());
}

#[test]
fn test_missing_scenario_file_fails() {
    let mut cmd = Command::new(cargo_bin!("paychan"));
    cmd.arg("does/not/exist.csv");

    cmd.assert().failure();
}
