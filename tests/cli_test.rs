use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("creator-ledger"));
    cmd.arg("tests/fixtures/operations.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "user,balance,pending_payouts,available,currency,frozen",
        ))
        // 9.50 + 19.00 earned, 10 paid out, 12 still pending
        .stdout(predicate::str::contains("creator,18.5,12,6.5,USD,false"))
        .stdout(predicate::str::contains("creator2,19,0,19,USD,false"))
        // Referral commission on a premium subscription
        .stdout(predicate::str::contains("ref1,3,0,3,USD,false"))
        // Disputed creator stays frozen after losing
        .stdout(predicate::str::contains("creator3,9.5,0,9.5,USD,true"))
        .stderr(predicate::str::contains("Error processing").not());

    Ok(())
}

#[test]
fn test_cli_missing_input_fails() {
    let mut cmd = Command::new(cargo_bin!("creator-ledger"));
    cmd.arg("tests/fixtures/does_not_exist.csv");

    cmd.assert().failure();
}
