use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;

fn run_cli(repo: &Path, args: &[&str], envs: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_hindsight"));
    cmd.current_dir(repo).args(args);
    for (key, value) in envs {
        cmd.env(key, value);
    }
    cmd.output().expect("command runs")
}

fn run_json(repo: &Path, args: &[&str], envs: &[(&str, &str)]) -> Value {
    let output = run_cli(repo, args, envs);
    assert!(
        output.status.success(),
        "command failed: args={args:?}\nstdout={}\nstderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("json stdout")
}

const PRESSURE: &str = r#"{"id":"e1","timestamp":"2026-01-10T23:18:42Z","event_type":"NodeMemoryPressure","node_name":"n1"}"#;
const KILL: &str = r#"{"id":"e2","timestamp":"2026-01-10T23:19:42Z","event_type":"OOMKill","pattern_id":"P001","pod_name":"api-7f","namespace":"default","node_name":"n1","payload":{"exit_code":137}}"#;

#[test]
fn ingest_derives_edges_and_causal_chain_reports_them() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    fs::create_dir_all(&home).expect("home dir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("repo dir");
    let home_str = home.to_string_lossy().to_string();
    let envs = [("HOME", home_str.as_str())];

    let events_path = repo.join("events.jsonl");
    fs::write(&events_path, format!("{PRESSURE}\n{KILL}\n")).expect("seed events");
    let events_arg = events_path.to_string_lossy().to_string();

    let report = run_json(&repo, &["ingest", "--events", &events_arg], &envs);
    assert_eq!(report["status"], "ok");
    assert_eq!(report["events"]["ingested"], 2);
    assert_eq!(report["events"]["malformed"], 0);
    assert_eq!(report["edges_created"], 1);

    let chain = run_json(&repo, &["causal-chain", "--pod", "api-7f"], &envs);
    assert_eq!(chain["anchor"]["id"], "e2");
    assert_eq!(chain["anchor"]["payload"]["exit_code"], 137);
    let causes = chain["causal_chain"].as_array().expect("causes array");
    assert_eq!(causes.len(), 1);
    assert_eq!(causes[0]["id"], "e1");
    assert_eq!(causes[0]["event_type"], "NodeMemoryPressure");
    assert!((causes[0]["confidence"].as_f64().expect("confidence") - 0.9).abs() < 1e-6);
    assert_eq!(causes[0]["edge_type"], "direct");
    assert_eq!(causes[0]["causes"].as_array().expect("leaf").len(), 0);
}

#[test]
fn reingesting_the_same_file_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    fs::create_dir_all(&home).expect("home dir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("repo dir");
    let home_str = home.to_string_lossy().to_string();
    let envs = [("HOME", home_str.as_str())];

    let events_path = repo.join("events.jsonl");
    fs::write(&events_path, format!("{PRESSURE}\n{KILL}\n")).expect("seed events");
    let events_arg = events_path.to_string_lossy().to_string();

    let first = run_json(&repo, &["ingest", "--events", &events_arg], &envs);
    assert_eq!(first["events"]["ingested"], 2);

    let second = run_json(&repo, &["ingest", "--events", &events_arg], &envs);
    assert_eq!(second["events"]["ingested"], 0);
    assert_eq!(second["events"]["duplicates"], 2);
    assert_eq!(second["edges_created"], 0);

    let summary = run_json(&repo, &["summary"], &envs);
    assert_eq!(summary["events"], 2);
    assert_eq!(summary["causal_edges"], 1);
}

#[test]
fn malformed_lines_are_skipped_and_counted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    fs::create_dir_all(&home).expect("home dir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("repo dir");
    let home_str = home.to_string_lossy().to_string();
    let envs = [("HOME", home_str.as_str())];

    let events_path = repo.join("events.jsonl");
    fs::write(
        &events_path,
        format!("{PRESSURE}\nnot json at all\n{{\"id\":\"x\"}}\n{KILL}\n"),
    )
    .expect("seed events");
    let events_arg = events_path.to_string_lossy().to_string();

    let report = run_json(&repo, &["ingest", "--events", &events_arg], &envs);
    assert_eq!(report["status"], "ok");
    assert_eq!(report["events"]["ingested"], 2);
    assert_eq!(report["events"]["malformed"], 2);
}

#[test]
fn unreadable_sources_are_reported_without_aborting() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    fs::create_dir_all(&home).expect("home dir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("repo dir");
    let home_str = home.to_string_lossy().to_string();
    let envs = [("HOME", home_str.as_str())];

    let events_path = repo.join("events.jsonl");
    fs::write(&events_path, format!("{PRESSURE}\n")).expect("seed events");
    let events_arg = events_path.to_string_lossy().to_string();

    // A glob that matches nothing resolves to no sources rather than failing.
    let missing_glob = repo.join("missing-*.jsonl").to_string_lossy().to_string();
    let report = run_json(
        &repo,
        &["ingest", "--events", &events_arg, "--events", &missing_glob],
        &envs,
    );
    assert_eq!(report["status"], "ok");
    assert_eq!(report["event_files"], 1);
    assert_eq!(report["events"]["ingested"], 1);
}

#[test]
fn ingest_without_sources_is_a_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    fs::create_dir_all(&home).expect("home dir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("repo dir");
    let home_str = home.to_string_lossy().to_string();
    let envs = [("HOME", home_str.as_str())];

    let output = run_cli(&repo, &["ingest"], &envs);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing_sources"), "stderr: {stderr}");
}

#[test]
fn init_creates_store_and_default_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let home = temp.path().join("home");
    fs::create_dir_all(&home).expect("home dir");
    let repo = temp.path().join("repo");
    fs::create_dir_all(&repo).expect("repo dir");
    let home_str = home.to_string_lossy().to_string();
    let envs = [("HOME", home_str.as_str())];

    let init = run_json(&repo, &["init"], &envs);
    assert_eq!(init["status"], "ok");
    assert_eq!(init["mode"], "repo");
    assert!(repo.join(".hindsight/memory.sqlite").exists());
    assert!(repo.join(".hindsight/config.yml").exists());

    let summary = run_json(&repo, &["summary"], &envs);
    assert_eq!(summary["events"], 0);
}
