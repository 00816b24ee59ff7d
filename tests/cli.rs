//! Integration tests for the aicli-isolation CLI.
//!
//! These tests run the actual executable from a scratch directory and check
//! output and exit codes.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the binary, isolated from any user config.
#[allow(deprecated)]
fn isolation_in(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("aicli-isolation").expect("failed to find binary");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env("NO_COLOR", "1")
        .env_remove("AICLI_ISOLATION_CONFIG");
    cmd
}

fn isolation() -> (TempDir, Command) {
    let dir = TempDir::new().unwrap();
    let cmd = isolation_in(&dir);
    (dir, cmd)
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    let (_dir, mut cmd) = isolation();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("profile"))
        .stdout(predicate::str::contains("network"))
        .stdout(predicate::str::contains("preset"))
        .stdout(predicate::str::contains("ports"))
        .stdout(predicate::str::contains("workload"))
        .stdout(predicate::str::contains("monitor"));
}

#[test]
fn test_version_shows_version() {
    let (_dir, mut cmd) = isolation();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("aicli-isolation"));
}

#[test]
fn test_profile_help_shows_level() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["profile", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--level"))
        .stdout(predicate::str::contains("--host-config"));
}

// -----------------------------------------------------------------------------
// Profile command tests
// -----------------------------------------------------------------------------

#[test]
fn test_profile_renders_workspace_network() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["profile", "ws-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aicli-workspace-ws-1"))
        .stdout(predicate::str::contains("\"isolation_level\": \"standard\""));
}

#[test]
fn test_profile_host_config_drops_all_capabilities() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["profile", "ws-1", "--level", "strict", "--host-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"ALL\""))
        .stdout(predicate::str::contains("CHOWN"))
        .stdout(predicate::str::contains("no-new-privileges:true"))
        .stdout(predicate::str::contains("SETUID").not());
}

#[test]
fn test_profile_rejects_unknown_level() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["profile", "ws-1", "--level", "paranoid"])
        .assert()
        .failure();
}

// -----------------------------------------------------------------------------
// Network command tests
// -----------------------------------------------------------------------------

#[test]
fn test_network_is_deterministic() {
    let dir = TempDir::new().unwrap();

    let first = isolation_in(&dir)
        .args(["network", "ws-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aicli-workspace-ws-1"))
        .stdout(predicate::str::contains("172."))
        .get_output()
        .stdout
        .clone();

    let second = isolation_in(&dir)
        .args(["network", "ws-1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    assert_eq!(first, second);
}

// -----------------------------------------------------------------------------
// Preset command tests
// -----------------------------------------------------------------------------

#[test]
fn test_preset_small() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["preset", "small"])
        .assert()
        .success()
        .stdout(predicate::str::contains("536870912"))
        .stdout(predicate::str::contains("100000"));
}

#[test]
fn test_preset_lists_all() {
    let (_dir, mut cmd) = isolation();
    cmd.arg("preset")
        .assert()
        .success()
        .stdout(predicate::str::contains("minimal"))
        .stdout(predicate::str::contains("small"))
        .stdout(predicate::str::contains("medium"))
        .stdout(predicate::str::contains("large"));
}

#[test]
fn test_preset_unknown_falls_back_to_defaults() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["preset", "huge"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unknown preset"))
        .stdout(predicate::str::contains("536870912"));
}

// -----------------------------------------------------------------------------
// Ports command tests
// -----------------------------------------------------------------------------

#[test]
fn test_ports_allows_unblocked_mapping() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["ports", "8080:8000", "--bind", "--host-ip", "127.0.0.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("8000/tcp"))
        .stdout(predicate::str::contains("127.0.0.1:8080"));
}

#[test]
fn test_ports_rejects_blocked_port() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["ports", "22:22"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("blocked"));
}

#[test]
fn test_ports_rejects_malformed_mapping() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["ports", "8080"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HOST:CONTAINER"));
}

// -----------------------------------------------------------------------------
// Config tests
// -----------------------------------------------------------------------------

#[test]
fn test_local_config_overrides_blocked_ports() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("aicli-isolation.toml"),
        "[isolation]\nblocked_ports = [8080]\n",
    )
    .unwrap();

    isolation_in(&dir)
        .args(["ports", "22:22"])
        .assert()
        .success();

    isolation_in(&dir)
        .args(["ports", "8080:80"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("8080"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["--config", "nope.toml", "preset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_invalid_policy_is_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("aicli-isolation.toml"),
        "[isolation]\ndefault_cpu_limit = 0.0\n",
    )
    .unwrap();

    isolation_in(&dir)
        .arg("preset")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid isolation policy"));
}

// -----------------------------------------------------------------------------
// Workload command tests
// -----------------------------------------------------------------------------

#[test]
fn test_workload_baseline() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["workload", "build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cpu_quota\": 400000"))
        .stdout(predicate::str::contains("\"pids_limit\": 500"));
}

#[test]
fn test_workload_unknown_type_fails() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["workload", "gaming"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown workload type"));
}

#[test]
fn test_workload_reads_history() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("history.json"), "[]").unwrap();

    isolation_in(&dir)
        .args(["workload", "test", "--history", "history.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cpu_quota\": 100000"));
}

// -----------------------------------------------------------------------------
// Monitor command tests
// -----------------------------------------------------------------------------

#[test]
fn test_monitor_runs_for_duration_and_prints_dashboard() {
    let (_dir, mut cmd) = isolation();
    cmd.args(["monitor", "--duration", "1", "--interval", "1"])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"monitoring_active\": false"))
        .stdout(predicate::str::contains("\"total_alerts\": 0"));
}
