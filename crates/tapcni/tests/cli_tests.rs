//! Process-level tests of the tap-plugin binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn plugin(logs: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tap-plugin").unwrap();
    cmd.env_clear()
        .env("TAPCNI_LOG_FILE", logs.path().join("plugin.log"))
        .env("TAPCNI_SOCKET_DIR", logs.path().join("sockets"));
    cmd
}

#[test]
fn test_version() {
    let logs = tempfile::tempdir().unwrap();

    plugin(&logs)
        .env("CNI_COMMAND", "VERSION")
        .assert()
        .success()
        .stdout(predicate::str::contains("supportedVersions"))
        .stdout(predicate::str::contains("1.0.0"));
}

#[test]
fn test_missing_command() {
    let logs = tempfile::tempdir().unwrap();

    plugin(&logs)
        .write_stdin("{}")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("CNI_COMMAND"));
}

#[test]
fn test_missing_netns() {
    let logs = tempfile::tempdir().unwrap();

    plugin(&logs)
        .env("CNI_COMMAND", "ADD")
        .env("CNI_CONTAINERID", "abcdef123")
        .write_stdin(r#"{"cniVersion":"1.0.0","name":"tapnet","type":"tap-plugin"}"#)
        .assert()
        .code(1)
        .stdout(predicate::str::contains(r#""code": 7"#))
        .stdout(predicate::str::contains("CNI_NETNS"));
}

#[test]
fn test_bad_config() {
    let logs = tempfile::tempdir().unwrap();

    plugin(&logs)
        .env("CNI_COMMAND", "ADD")
        .env("CNI_CONTAINERID", "abcdef123")
        .env("CNI_NETNS", "/var/run/netns/none")
        .write_stdin("{\"name\": ")
        .assert()
        .code(1)
        .stdout(predicate::str::contains(r#""code": 6"#));
}

#[test]
fn test_logs_go_to_file() {
    let logs = tempfile::tempdir().unwrap();

    plugin(&logs)
        .env("CNI_COMMAND", "CHECK")
        .env("CNI_CONTAINERID", "abcdef123")
        .env("CNI_NETNS", "/var/run/netns/none")
        .write_stdin(r#"{"name":"tapnet","type":"tap-plugin"}"#)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let log = std::fs::read_to_string(logs.path().join("plugin.log")).unwrap();
    assert!(log.contains("Handling invocation"), "{log}");
}
