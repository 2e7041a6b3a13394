//! End-to-end checks of the `bfxdiag` binary with state redirected into a
//! temporary sandbox.

mod common;

use std::fs;
use std::path::Path;

use serde_json::Value;

fn sandbox_config(dir: &Path) -> String {
    let path = dir.join("config.toml");
    fs::write(&path, "").unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    let out = common::run_cli_in("help", dir.path(), &["--help"], &[]);
    assert!(out.status.success(), "log: {}", out.log_path.display());
    for cmd in ["dashboard", "tail", "status", "check-port", "toggle-throttle", "registry"] {
        assert!(out.stdout.contains(cmd), "help is missing {cmd}");
    }
}

#[test]
fn version_prints_package_version() {
    let dir = tempfile::tempdir().unwrap();
    let out = common::run_cli_in("version", dir.path(), &["--version"], &[]);
    assert!(out.status.success());
    assert!(out.stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn config_path_honors_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    let out = common::run_cli_in(
        "config_path",
        dir.path(),
        &["--json", "--config", &config, "config", "path"],
        &[],
    );
    assert!(out.status.success(), "log: {}", out.log_path.display());
    let payload: Value = serde_json::from_str(out.stdout.trim()).unwrap();
    assert_eq!(payload["config_path"], Value::String(config));
}

#[test]
fn check_port_rejects_bad_input_with_user_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    for args in [
        vec!["--config", config.as_str(), "check-port", "host", "70000"],
        vec!["--config", config.as_str(), "check-port", "host", "abc"],
        vec!["--config", config.as_str(), "check-port", "host", "80", "--protocol", "SCTP"],
    ] {
        let out = common::run_cli_in("check_port_invalid", dir.path(), &args, &[]);
        assert_eq!(out.status.code(), Some(1), "args {args:?}, log: {}", out.log_path.display());
        assert!(out.stderr.contains("bfxdiag:"));
    }
}

#[test]
fn tail_prints_last_hundred_lines_and_greps() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    let log = dir.path().join("BESClient.log");
    let mut body: String = (1..=120).map(|i| format!("line {i}\n")).collect();
    body.push_str("ERROR download failed\n");
    fs::write(&log, body).unwrap();
    let log = log.to_string_lossy().into_owned();

    let out = common::run_cli_in(
        "tail",
        dir.path(),
        &["--no-color", "--config", &config, "tail", &log],
        &[],
    );
    assert!(out.status.success(), "log: {}", out.log_path.display());
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(lines.len(), 100);
    assert_eq!(lines[0], "line 22");
    assert_eq!(lines[99], "ERROR download failed");

    let out = common::run_cli_in(
        "tail_grep",
        dir.path(),
        &["--no-color", "--config", &config, "tail", &log, "--grep", "error"],
        &[],
    );
    assert!(out.status.success());
    assert_eq!(out.stdout.trim(), "ERROR download failed");
}

#[test]
fn tail_of_missing_file_is_a_user_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    let missing = dir.path().join("nope.log");
    let out = common::run_cli_in(
        "tail_missing",
        dir.path(),
        &["--config", &config, "tail", missing.to_str().unwrap()],
        &[],
    );
    assert_eq!(out.status.code(), Some(1), "log: {}", out.log_path.display());
}

#[test]
fn status_json_has_every_field_and_target() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    let out = common::run_cli_in(
        "status_json",
        dir.path(),
        &["--json", "--config", &config, "status"],
        &[("BFX_STATUS_PROBE_TIMEOUT_MS", "200")],
    );
    assert!(out.status.success(), "log: {}", out.log_path.display());
    let payload: Value = serde_json::from_str(out.stdout.trim()).unwrap();
    assert_eq!(payload["target"], "local");
    for field in [
        "service",
        "tcp_port",
        "udp_port",
        "relay",
        "throttle",
        "subsidiary",
        "version",
        "workstation",
    ] {
        assert!(payload[field]["state"].is_string(), "missing {field}");
    }
    // Nothing has written the relay settings in the sandbox store.
    assert_eq!(payload["relay"]["state"], "not_found");
}

#[test]
fn activity_log_records_start_and_stop() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    let log = dir.path().join("a.log");
    fs::write(&log, "x\n").unwrap();
    let out = common::run_cli_in(
        "activity_log",
        dir.path(),
        &["--config", &config, "tail", log.to_str().unwrap()],
        &[],
    );
    assert!(out.status.success());

    let activity = fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
    let events: Vec<Value> = activity
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(events.iter().any(|e| e["event"] == "app_start"));
    assert!(events.iter().any(|e| e["event"] == "app_stop"));
}

#[cfg(not(windows))]
#[test]
fn registry_set_then_get_round_trips_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    let key = r"SOFTWARE\BigFix\EnterpriseClient\Settings\Client\_BESClient_Test";

    let out = common::run_cli_in(
        "registry_set",
        dir.path(),
        &["--config", &config, "registry", "set", key, "value", "hello"],
        &[],
    );
    assert!(out.status.success(), "log: {}", out.log_path.display());
    assert_eq!(out.stdout.trim(), "Value written.");

    let out = common::run_cli_in(
        "registry_get",
        dir.path(),
        &["--json", "--config", &config, "registry", "get", key, "value"],
        &[],
    );
    assert!(out.status.success(), "log: {}", out.log_path.display());
    let payload: Value = serde_json::from_str(out.stdout.trim()).unwrap();
    assert_eq!(payload["output"], "hello");
    assert_eq!(payload["target"], "local");

    let out = common::run_cli_in(
        "registry_get_missing",
        dir.path(),
        &["--config", &config, "registry", "get", key, "other"],
        &[],
    );
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn remote_requires_password_env() {
    let dir = tempfile::tempdir().unwrap();
    let config = sandbox_config(dir.path());
    let out = common::run_cli_in(
        "remote_no_password",
        dir.path(),
        &["--config", &config, "--remote", "ws01", "--user", "admin", "status"],
        &[],
    );
    assert_eq!(out.status.code(), Some(1), "log: {}", out.log_path.display());
    assert!(out.stderr.contains("BFX_REMOTE_PASSWORD"));
}
