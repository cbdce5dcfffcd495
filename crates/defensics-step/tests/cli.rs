//! Integration tests for the defensics-step binary

use assert_cmd::cargo;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const JOB_FILE: &str = r#"
[[instances]]
name = "My Defensics"
url = "http://127.0.0.1:9/"
certificate_validation_disabled = false
credentials_id = "DEFENSICS_TEST_TOKEN"
request_timeout_secs = 5

[step]
instance = "My Defensics"
test_plan = "http.testplan"
poll_interval_secs = 30
"#;

fn write_job(temp_dir: &TempDir, content: &str) -> PathBuf {
    let path = temp_dir.path().join("job.toml");
    fs::write(&path, content).unwrap();
    path
}

fn command() -> assert_cmd::Command {
    let mut cmd = cargo::cargo_bin_cmd!("defensics-step");
    cmd.env_remove("DEFENSICS_MAX_POLLING_INTERVAL")
        .env_remove("DEFENSICS_LOG");
    cmd
}

#[test]
fn test_config_show_prints_effective_settings() {
    let temp_dir = TempDir::new().unwrap();
    let job = write_job(&temp_dir, JOB_FILE);

    command()
        .env("DEFENSICS_MAX_POLLING_INTERVAL", "1")
        .args(["config", "show", "--config"])
        .arg(&job)
        .assert()
        .success()
        .stdout(predicate::str::contains("test_plan = \"http.testplan\""))
        .stdout(predicate::str::contains("http://127.0.0.1:9/api/v2/"))
        .stdout(predicate::str::contains("Effective poll interval:  1s"));
}

#[test]
fn test_config_show_json() {
    let temp_dir = TempDir::new().unwrap();
    let job = write_job(&temp_dir, JOB_FILE);

    let output = command()
        .args(["config", "show", "--json", "--config"])
        .arg(&job)
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["instance"], "My Defensics");
    assert_eq!(json["testPlan"], "http.testplan");
    assert_eq!(json["pollIntervalSecs"], 30);
    assert_eq!(json["credentialsId"], "DEFENSICS_TEST_TOKEN");
}

#[test]
fn test_config_show_rejects_invalid_file() {
    let temp_dir = TempDir::new().unwrap();
    let job = write_job(
        &temp_dir,
        r#"
[step]
instance = "Missing"
test_plan = "http.testplan"
"#,
    );

    command()
        .args(["config", "show", "--config"])
        .arg(&job)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load job file"));
}

#[test]
fn test_run_without_credentials_fails_before_submitting() {
    let temp_dir = TempDir::new().unwrap();
    let job = write_job(&temp_dir, JOB_FILE);
    let build_dir = temp_dir.path().join("build");

    command()
        .env_remove("DEFENSICS_TEST_TOKEN")
        .args(["run", "--config"])
        .arg(&job)
        .arg("--build-dir")
        .arg(&build_dir)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("credentials"));

    assert!(!build_dir.join("result.json").exists());
}

#[test]
fn test_run_against_unreachable_server_records_failure() {
    let temp_dir = TempDir::new().unwrap();
    let job = write_job(&temp_dir, JOB_FILE);
    let build_dir = temp_dir.path().join("build");
    let job_dir = temp_dir.path().join("job");

    command()
        .env("DEFENSICS_TEST_TOKEN", "test-token")
        .args(["run", "--config"])
        .arg(&job)
        .arg("--build-dir")
        .arg(&build_dir)
        .arg("--job-dir")
        .arg(&job_dir)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("FAILURE"));

    let record: serde_json::Value =
        serde_json::from_slice(&fs::read(build_dir.join("result.json")).unwrap()).unwrap();
    assert_eq!(record["outcome"], "FAILURE");
    assert_eq!(record["causes"][0]["kind"], "submission_failed");
    assert!(!job_dir.join("defensics-report.json").exists());
}
