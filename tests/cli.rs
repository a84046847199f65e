//! Drives the `ragsync` binary against a temporary directory and index.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragsync");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("bedford_trash_recycling.txt"),
        "Trash and recycling are collected every Tuesday morning.\n\n\
         Bulk items need a sticker from the town hall.",
    )
    .unwrap();
    fs::write(
        docs.join("library.txt"),
        "The public library is open from nine to five on weekdays.",
    )
    .unwrap();
    fs::write(docs.join("readme.md"), "Markdown is not a supported format.").unwrap();

    let config_content = format!(
        r#"[index]
path = "{root}/data/index.sqlite"
collection = "test_docs"

[watch]
dir = "{root}/docs"

[chunking]
chunk_size = 500
chunk_overlap = 50

[[chunking.naming]]
prefix = "bedford_"
category = "bedford_information"

[embedding]
provider = "hash"
dims = 128

[retrieval]
default_k = 3
"#,
        root = root.display()
    );

    let config_path = config_dir.join("ragsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_ragsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_index() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragsync(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Index initialized successfully"));
    assert!(tmp.path().join("data/index.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_ragsync(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_reports_counts() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ragsync(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("files: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("indexed: 2"), "stdout: {}", stdout);
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_empty_directory() {
    let (tmp, config_path) = setup_test_env();
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();

    let (stdout, stderr, success) =
        run_ragsync(&config_path, &["ingest", "--dir", empty.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("no supported files"), "stdout: {}", stdout);
}

#[test]
fn test_search_after_ingest() {
    let (_tmp, config_path) = setup_test_env();
    run_ragsync(&config_path, &["ingest"]);

    let (stdout, stderr, success) =
        run_ragsync(&config_path, &["search", "when is trash collected", "--limit", "1"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.starts_with("1. ["), "stdout: {}", stdout);
    assert!(stdout.contains("bedford_trash_recycling.txt"), "stdout: {}", stdout);
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_search_with_category_filter() {
    let (_tmp, config_path) = setup_test_env();
    run_ragsync(&config_path, &["ingest"]);

    let (stdout, _, success) = run_ragsync(
        &config_path,
        &["search", "library hours", "--category", "bedford_information"],
    );
    assert!(success);
    assert!(stdout.contains("category: bedford_information"));
    assert!(!stdout.contains("library.txt"));

    let (stdout, _, success) =
        run_ragsync(&config_path, &["search", "library hours", "--topic", "no_such_topic"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_sources_and_get() {
    let (tmp, config_path) = setup_test_env();
    run_ragsync(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_ragsync(&config_path, &["sources"]);
    assert!(success, "sources failed: {}", stderr);
    assert!(stdout.contains("library.txt"));
    assert!(stdout.contains("2 sources"));
    assert!(!stdout.contains("readme.md"));

    let source = tmp
        .path()
        .join("docs/library.txt")
        .canonicalize()
        .unwrap();
    let (stdout, stderr, success) =
        run_ragsync(&config_path, &["get", source.to_str().unwrap()]);
    assert!(success, "get failed: {}", stderr);
    assert!(stdout.contains("--- Chunks (1) ---"));
    assert!(stdout.contains("[chunk 0]"));
    assert!(stdout.contains("open from nine to five"));
}

#[test]
fn test_get_unknown_source_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ragsync(&config_path, &["init"]);
    let (_, stderr, success) = run_ragsync(&config_path, &["get", "/nowhere/missing.txt"]);
    assert!(!success);
    assert!(stderr.contains("source not indexed"));
}

#[test]
fn test_reconcile_removes_deleted_file() {
    let (tmp, config_path) = setup_test_env();
    run_ragsync(&config_path, &["ingest"]);
    fs::remove_file(tmp.path().join("docs/library.txt")).unwrap();

    let (stdout, stderr, success) = run_ragsync(&config_path, &["reconcile"]);
    assert!(success, "reconcile failed: {}", stderr);
    assert!(stdout.contains("removed:"), "stdout: {}", stdout);
    assert!(stdout.contains("library.txt"));

    let (stdout, _, _) = run_ragsync(&config_path, &["sources"]);
    assert!(stdout.contains("1 sources"));

    // Second pass has nothing to do
    let (stdout, _, success) = run_ragsync(&config_path, &["reconcile"]);
    assert!(success);
    assert!(!stdout.contains("removed:"));
    assert!(stdout.contains("unchanged: 1"));
}

#[test]
fn test_missing_config_fails() {
    let (stdout, stderr, success) =
        run_ragsync(Path::new("/nonexistent/ragsync.toml"), &["sources"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_watch_with_missing_directory_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("docs")).unwrap();
    let (_, stderr, success) = run_ragsync(&config_path, &["watch"]);
    assert!(!success);
    assert!(stderr.contains("Watched directory does not exist"));
}
