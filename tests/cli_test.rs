//! Binary smoke tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("nexus")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("worktrees"));
}

#[test]
fn test_config_prints_defaults() {
    Command::cargo_bin("nexus")
        .unwrap()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max-iterations: 50"))
        .stdout(predicate::str::contains("task-max-minutes: 30"));
}

#[test]
fn test_submit_requires_title() {
    Command::cargo_bin("nexus")
        .unwrap()
        .args(["submit", "--description", "something"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--title"));
}
