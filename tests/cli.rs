// ABOUTME: Integration tests for the crishim CLI commands.
// ABOUTME: Validates --help output, init, and a full run/ps/rm cycle.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn crishim_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("crishim"))
}

/// Command running in a scratch directory with its own root and state dirs.
fn scoped_cmd(dir: &TempDir) -> Command {
    let mut cmd = crishim_cmd();
    cmd.current_dir(dir.path())
        .env("CRISHIM_ROOT_DIR", dir.path().join("root"))
        .env("CRISHIM_STATE_DIR", dir.path().join("state"))
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn help_shows_commands() {
    crishim_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("ps"))
        .stdout(predicate::str::contains("rm"))
        .stdout(predicate::str::contains("stats"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("crishim.yml");

    crishim_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .success();

    assert!(config_path.exists(), "crishim.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("state_dir:"), "Config should have state_dir field");
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("crishim.yml");

    fs::write(&config_path, "log_level: warn\n").unwrap();

    crishim_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn invalid_config_is_reported() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("crishim.yml"), "stream:\n  token_ttl: soon\n").unwrap();

    scoped_cmd(&temp_dir)
        .arg("ps")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"));
}

#[test_group::group(process)]
#[test]
fn run_prints_output_and_exit_code() {
    let temp_dir = tempfile::tempdir().unwrap();

    scoped_cmd(&temp_dir)
        .args(["run", "--rm", "--", "/bin/sh", "-c", "echo hello; exit 4"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("hello"));

    scoped_cmd(&temp_dir)
        .arg("ps")
        .assert()
        .success()
        .stdout(predicate::str::contains("CONTAINER ID"))
        .stdout(predicate::str::contains("exited").not());
}

#[test_group::group(process)]
#[test]
fn kept_container_is_listed_and_removed() {
    let temp_dir = tempfile::tempdir().unwrap();

    let output = scoped_cmd(&temp_dir)
        .args(["run", "--name", "kept", "--", "/bin/true"])
        .output()
        .unwrap();
    assert!(output.status.success());
    // The container ID is reported on stderr when the container is kept.
    let stderr = String::from_utf8(output.stderr).unwrap();
    let id = stderr.lines().last().unwrap().trim().to_string();
    assert_eq!(id.len(), 64);

    scoped_cmd(&temp_dir)
        .arg("ps")
        .assert()
        .success()
        .stdout(predicate::str::contains("k8s_kept_run"))
        .stdout(predicate::str::contains("exited"));

    scoped_cmd(&temp_dir)
        .args(["rm", &id[..12]])
        .assert()
        .success()
        .stdout(predicate::str::contains(id.as_str()));

    scoped_cmd(&temp_dir)
        .arg("ps")
        .assert()
        .success()
        .stdout(predicate::str::contains("k8s_kept_run").not());
}

#[test]
fn bad_env_is_rejected() {
    let temp_dir = tempfile::tempdir().unwrap();

    scoped_cmd(&temp_dir)
        .args(["run", "--env", "NOVALUE", "--", "/bin/true"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("KEY=VALUE"));
}
