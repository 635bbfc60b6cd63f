use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

fn meltsbatch() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("meltsbatch"));
    cmd.env_remove("MELTSBATCH_EXECUTABLE")
        .env_remove("MELTSBATCH_TIMEOUT_SECONDS")
        .env_remove("MELTSBATCH_LOG_LEVEL")
        .env("MELTSBATCH_CONSOLE_OUTPUT", "none");
    cmd
}

const BATCH: &str = r#"
root = "out"
executable = "missing/run_alphamelts.command"

[default]
Title = "MORB"
"Initial Temperature" = 1300

[grid]
"Initial Pressure" = [5000, 7000]

[[compositions]]
SiO2 = 50.0

[[compositions]]
SiO2 = 48.0
"#;

#[test]
fn test_top_level_help_lists_commands() {
    meltsbatch()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("BATCH COMMANDS"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("hash"));
}

#[test]
fn test_run_help_documents_overrides() {
    meltsbatch()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--overwrite"))
        .stdout(predicate::str::contains("--timeout"))
        .stdout(predicate::str::contains("--exclude"))
        .stdout(predicate::str::contains("meltsbatch run batch.toml"))
        .stdout(predicate::str::contains("MELTSBATCH_TIMEOUT_SECONDS"))
        .stdout(predicate::str::contains("MELTSBATCH_CONSOLE_OUTPUT"));
}

#[test]
fn test_version_flag() {
    meltsbatch()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(meltsbatch::VERSION));
}

#[test]
fn test_hash_command_prints_hash_and_name() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{"Title": "MORB", "Initial Pressure": 5000}"#).unwrap();

    let output = meltsbatch().arg("hash").arg(&path).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].len(), 10);
    assert_eq!(lines[1], format!("MORB5kbar{}", lines[0]));
}

#[test]
fn test_hash_command_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    fs::write(&path, r#"{"SiO2": 50.0}"#).unwrap();

    meltsbatch()
        .arg("hash")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Title"));
}

#[test]
#[serial]
fn test_plan_writes_index_and_lists_jobs() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("batch.toml");
    fs::write(&path, BATCH).unwrap();

    let output = meltsbatch().arg("plan").arg(&path).output().unwrap();
    assert!(output.status.success(), "{:?}", output);
    let stdout = String::from_utf8(output.stdout).unwrap();

    assert_eq!(stdout.lines().filter(|l| l.contains("pending")).count(), 4);
    assert!(stdout.contains("4 jobs, estimated calculation time: 1m"));
    assert!(temp_dir.path().join("out/meltsBatchConfig.json").is_file());
    assert!(temp_dir.path().join("out/autolog.log").is_file());
}

#[test]
#[serial]
fn test_run_reports_failures_with_exit_code() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("batch.toml");
    fs::write(&path, BATCH).unwrap();

    meltsbatch()
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Failed:    4"))
        .stderr(predicate::str::contains("4 job(s) failed"));
}

#[test]
fn test_missing_batch_file() {
    meltsbatch()
        .args(["plan", "/definitely/not/here.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
