//! Integration tests for the JobChat CLI.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn test_help_lists_commands() {
    let mut cmd = cargo_bin_cmd!("cli");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("watch"))
        .stdout(predicates::str::contains("conversations"))
        .stdout(predicates::str::contains("send"))
        .stdout(predicates::str::contains("notifications"))
        .stdout(predicates::str::contains("completion"));
}

#[test]
fn test_send_requires_user_and_conversation() {
    let mut cmd = cargo_bin_cmd!("cli");
    cmd.arg("send").arg("hello");

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains(
            "the following required arguments were not provided",
        ))
        .stderr(predicates::str::contains("--user <USER>"));
}

#[test]
fn test_watch_rejects_invalid_user_uuid() {
    let mut cmd = cargo_bin_cmd!("cli");
    cmd.arg("watch").arg("--user").arg("not-a-uuid");

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("invalid value"))
        .stderr(predicates::str::contains("--user <USER>"));
}

#[test]
#[serial]
fn test_config_generates_json_file() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("cli");
    cmd.current_dir(dir.path()).arg("config").arg("--format").arg("json");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("config.json"));

    let written = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(value["connection"]["ack_timeout_ms"], 10_000);
    assert_eq!(value["server"]["base_url"], "http://localhost:8080/");
}

#[test]
#[serial]
fn test_config_rejects_unknown_format() {
    let dir = TempDir::new().unwrap();
    let mut cmd = cargo_bin_cmd!("cli");
    cmd.current_dir(dir.path())
        .arg("config")
        .arg("--format")
        .arg("toml");

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("Unsupported format"));
    assert!(!dir.path().join("config.toml").exists());
}

#[test]
fn test_completion_for_bash() {
    let mut cmd = cargo_bin_cmd!("cli");
    cmd.arg("completion").arg("--shell").arg("bash");

    cmd.assert()
        .success()
        .stdout(predicates::str::contains("jobchat"));
}

#[test]
fn test_conversations_reports_unreachable_server() {
    let mut cmd = cargo_bin_cmd!("cli");
    cmd.env_remove("JOBCHAT_SERVER_URL")
        .arg("conversations")
        .arg("--user")
        .arg("00000000-0000-0000-0000-000000000001")
        .arg("--server")
        .arg("http://127.0.0.1:9/")
        .timeout(std::time::Duration::from_secs(10));

    cmd.assert().failure().stderr(
        predicates::str::contains("failed to load conversations")
            .or(predicates::str::contains("error sending request")),
    );
}

#[test]
fn test_invalid_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "server = 1").unwrap();

    let mut cmd = cargo_bin_cmd!("cli");
    cmd.arg("notifications")
        .arg("--user")
        .arg("00000000-0000-0000-0000-000000000001")
        .arg("--config")
        .arg(&path);

    cmd.assert()
        .failure()
        .stderr(predicates::str::contains("failed to load configuration"));
}
