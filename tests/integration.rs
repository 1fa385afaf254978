use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn patents_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("patents");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}"

[cache]
dir = "{}"

[catalog]
base_url = "http://127.0.0.1:9/api/3"
dataset_ids = ["patents"]

[ingest]
politeness_delay_ms = 0
"#,
        root.join("data/patents.db").display(),
        root.join("cache").display(),
    );

    let config_path = config_dir.join("patents.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_patents(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(patents_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run patents binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_patents(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));

    let (_, stderr, success) = run_patents(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_count_on_empty_database() {
    let (_tmp, config) = setup_test_env();
    run_patents(&config, &["init"]);

    let (stdout, stderr, success) = run_patents(&config, &["count"]);
    assert!(success, "count failed: {}", stderr);
    assert_eq!(stdout.trim(), "0");
}

#[test]
fn test_stats_lists_tables() {
    let (_tmp, config) = setup_test_env();
    run_patents(&config, &["init"]);

    let (stdout, stderr, success) = run_patents(&config, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("patents_main"));
    assert!(stdout.contains("patent_claims"));
    assert!(stdout.contains("0 cached, 0 processed"));
}

#[test]
fn test_stats_requires_init() {
    let (_tmp, config) = setup_test_env();

    let (_, stderr, success) = run_patents(&config, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("patents init"));
}

#[test]
fn test_fetch_fails_when_catalog_unreachable() {
    let (_tmp, config) = setup_test_env();
    run_patents(&config, &["init"]);

    let (_, stderr, success) = run_patents(&config, &["fetch", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("no dataset could be resolved"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        "[db]\npath = \"x.db\"\n\n[ingest]\nbatch_size = 0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_patents(&config_path, &["count"]);
    assert!(!success);
    assert!(stderr.contains("batch_size"));
}
