//! Integration tests for the `conclave` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn conclave() -> Command {
    let mut cmd = Command::cargo_bin("conclave").unwrap();
    cmd.env_remove("CONCLAVE_CONFIG").env_remove("RUST_LOG").env("NO_COLOR", "1");
    cmd
}

/// Writes a config using a SQLite store inside `temp_dir`.
fn write_sqlite_config(temp_dir: &TempDir) -> String {
    let db_path = temp_dir.path().join("conclave.db");
    let config_path = temp_dir.path().join("conclave.toml");
    let content = format!(
        r#"
[store]
backend = "sqlite"
path = "{}"

[[agents]]
name = "r1"
role = "researcher"

[[agents]]
name = "s1"
role = "synthesizer"
"#,
        db_path.to_str().unwrap().replace('\\', "/")
    );
    fs::write(&config_path, content).unwrap();
    config_path.to_str().unwrap().to_string()
}

#[test]
fn test_detect_orchestration_needed() {
    conclave()
        .args(["detect", "Please do a comprehensive analysis of sales data"])
        .assert()
        .success()
        .stdout(predicate::str::contains("orchestration needed"))
        .stdout(predicate::str::contains("no orchestration").not());
}

#[test]
fn test_detect_no_orchestration() {
    conclave()
        .args(["detect", "What's 2+2?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no orchestration needed"));
}

#[test]
fn test_roles() {
    conclave()
        .args(["roles", "research and then write a comprehensive report"])
        .assert()
        .success()
        .stdout(predicate::str::contains("researcher"))
        .stdout(predicate::str::contains("synthesizer"));

    conclave().args(["roles", "hello"]).assert().success().stdout("general\n");
}

#[test]
fn test_run_with_ad_hoc_agents_json() {
    conclave()
        .args([
            "run",
            "--parent",
            "coach",
            "--goal",
            "research and report on X",
            "--agent",
            "r1=researcher",
            "--agent",
            "s1=synthesizer",
            "--role",
            "researcher",
            "--role",
            "synthesizer",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"research_task\""))
        .stdout(predicate::str::contains("\"synthesis_task\""))
        .stdout(predicate::str::contains("\"status\": \"completed\""))
        .stdout(predicate::str::contains("\"phase\": \"initializing\""));
}

#[test]
fn test_run_human_output() {
    conclave()
        .args(["run", "--parent", "coach", "--goal", "find sources", "--agent", "r1=researcher"])
        .args(["--role", "researcher"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Research delegated to r1"))
        .stdout(predicate::str::contains("Workflow:"));
}

#[test]
fn test_run_without_agents_fails() {
    conclave()
        .args(["run", "--parent", "coach", "--goal", "find sources"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No agents available"));
}

#[test]
fn test_run_rejects_unknown_role() {
    conclave()
        .args(["run", "--parent", "coach", "--goal", "x"])
        .args(["--agent", "r1=researcher", "--role", "wizard"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --role"));
}

#[test]
fn test_run_failed_pipeline_exits_non_zero() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("strict.toml");
    fs::write(&config_path, "[orchestrator]\ngeneral_role_fallback = false\n").unwrap();

    conclave()
        .args(["--config", config_path.to_str().unwrap()])
        .args([
            "run",
            "--parent",
            "coach",
            "--goal",
            "deep work",
            "--agent",
            "r1=researcher",
            "--agent",
            "s1=synthesizer",
            "--role",
            "researcher",
            "--role",
            "analyzer",
            "--role",
            "synthesizer",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"))
        .stderr(predicate::str::contains("Collaboration failed"));
}

#[test]
fn test_workspaces_lists_persisted_runs() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_sqlite_config(&temp_dir);

    conclave()
        .args(["--config", config.as_str(), "workspaces"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No workspaces found."));

    conclave()
        .args(["--config", config.as_str(), "run", "--parent", "coach"])
        .args(["--goal", "research and report on X"])
        .assert()
        .success();

    conclave()
        .args(["--config", config.as_str(), "workspaces", "--parent", "coach", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"parent_agent\": \"coach\""))
        .stdout(predicate::str::contains("\"status\": \"completed\""));

    // Finished runs are not active.
    conclave()
        .args(["--config", config.as_str(), "workspaces", "--active"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No workspaces found."));
}

#[test]
fn test_missing_config_file_fails() {
    conclave()
        .args(["--config", "/nonexistent/conclave.toml", "roles", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
