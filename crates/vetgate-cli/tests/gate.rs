#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::str::contains;

/// Minimal stand-in for the scanner binary: answers the version probe.
fn fake_scanner(dir: &Path) -> PathBuf {
    let path = dir.join("vet");
    fs::write(&path, "#!/bin/sh\necho \"Version: 9.9.9\"\n").unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn gate_cmd(temp: &Path) -> Command {
    let mut cmd = Command::cargo_bin("vetgate-cli").unwrap();
    cmd.env_clear()
        .env("GITHUB_REPOSITORY", "octo/widgets")
        .env("GITHUB_TOKEN", "test-token")
        .env("RUNNER_TEMP", temp);
    cmd
}

#[test]
fn missing_repository_env_fails_with_a_clear_message() {
    let temp = tempfile::tempdir().unwrap();
    let mut cmd = gate_cmd(temp.path());
    cmd.env_remove("GITHUB_REPOSITORY")
        .env("GITHUB_EVENT_NAME", "schedule")
        .assert()
        .failure()
        .stderr(contains("GITHUB_REPOSITORY"));
}

#[test]
fn unsupported_event_type_is_named_in_the_error() {
    let temp = tempfile::tempdir().unwrap();
    let scanner = fake_scanner(temp.path());
    let mut cmd = gate_cmd(temp.path());
    cmd.env("GITHUB_EVENT_NAME", "release")
        .env("VETGATE_SCANNER_PATH", &scanner)
        .assert()
        .failure()
        .stderr(contains("unsupported event type: release"));
}

#[test]
fn schedule_event_is_a_noop_success() {
    let temp = tempfile::tempdir().unwrap();
    let scanner = fake_scanner(temp.path());
    let mut cmd = gate_cmd(temp.path());
    cmd.env("GITHUB_EVENT_NAME", "schedule")
        .env("VETGATE_SCANNER_PATH", &scanner)
        .assert()
        .success()
        .stdout(contains("\"report\""));
}

#[test]
fn settings_load_from_a_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let scanner = fake_scanner(temp.path());
    let config = temp.path().join("vetgate.toml");
    fs::write(
        &config,
        format!("scanner_path = \"{}\"\n", scanner.display()),
    )
    .unwrap();

    let mut cmd = gate_cmd(temp.path());
    cmd.args(["--config", config.to_str().unwrap()])
        .env("GITHUB_EVENT_NAME", "schedule")
        .assert()
        .success();
}

#[test]
fn unverifiable_scanner_binary_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    // A binary that never prints the version banner.
    let scanner = temp.path().join("vet");
    fs::write(&scanner, "#!/bin/sh\necho \"no banner\"\n").unwrap();
    let mut perms = fs::metadata(&scanner).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&scanner, perms).unwrap();

    let mut cmd = gate_cmd(temp.path());
    cmd.env("GITHUB_EVENT_NAME", "schedule")
        .env("VETGATE_SCANNER_PATH", &scanner)
        .assert()
        .failure()
        .stderr(contains("scanner binary unusable"));
}
