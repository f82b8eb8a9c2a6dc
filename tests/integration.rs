use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn hub_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_hub"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    // Two bundles, one draft that the exclude glob hides, and a stray file.
    let reports = root.join("reports");
    for key in ["gcc_ai_outlook", "imf_digital_2024", "_draft"] {
        let dir = reports.join(key);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("{}.md", key)),
            format!("# {}\n\nA report body.\n", key),
        )
        .unwrap();
    }
    fs::write(reports.join("README.txt"), "not a bundle").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/hub.sqlite"

[processing]
reports_path = "{root}/reports"
exclude_globs = ["_*"]

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("hub.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_hub(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = hub_binary();
    let workdir = config_path.parent().and_then(Path::parent).unwrap();
    let output = Command::new(&binary)
        .current_dir(workdir)
        .env_remove("RAGFLOW_API_KEY")
        .env_remove("OPENROUTER_API_KEY")
        .env_remove("TAVILY_API_KEY")
        .env_remove("FIRECRAWL_API_KEY")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run hub binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hub(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/hub.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_hub(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_hub(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_status_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    run_hub(&config_path, &["init"]);

    let (stdout, stderr, success) = run_hub(&config_path, &["status"]);
    assert!(success, "status failed: stderr={}", stderr);
    assert!(stdout.contains("Documents:    0"));
    assert!(stdout.contains("never"));
}

#[test]
fn test_process_dry_run_lists_bundles() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_hub(&config_path, &["process", "--dry-run"]);
    assert!(success, "dry run failed: stderr={}", stderr);
    assert!(stdout.contains("bundles: 2"));
    assert!(stdout.contains("gcc_ai_outlook"));
    assert!(stdout.contains("imf_digital_2024"));
    assert!(!stdout.contains("_draft"));
}

#[test]
fn test_process_dry_run_window() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_hub(
        &config_path,
        &["process", "--dry-run", "--start", "1", "--limit", "5"],
    );
    assert!(success);
    assert!(stdout.contains("bundles: 1"));
    assert!(stdout.contains("imf_digital_2024"));
}

#[test]
fn test_process_without_keys_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_hub(&config_path, &["init"]);

    let (_, stderr, success) = run_hub(&config_path, &["process", "--progress", "off"]);
    assert!(!success, "process should fail without API keys");
    assert!(stderr.contains("API_KEY"), "stderr={}", stderr);
}

#[test]
fn test_search_empty_library() {
    let (_tmp, config_path) = setup_test_env();
    run_hub(&config_path, &["init"]);

    let (stdout, stderr, success) = run_hub(&config_path, &["search", "energy"]);
    assert!(success, "search failed: stderr={}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_rejects_unknown_sort() {
    let (_tmp, config_path) = setup_test_env();
    run_hub(&config_path, &["init"]);

    let (_, _, success) = run_hub(&config_path, &["search", "--sort", "pages"]);
    assert!(!success);
}

#[test]
fn test_get_missing_document() {
    let (_tmp, config_path) = setup_test_env();
    run_hub(&config_path, &["init"]);

    let (_, stderr, success) = run_hub(&config_path, &["get", "no-such-id"]);
    assert!(!success);
    assert!(stderr.contains("no-such-id"));
}

#[test]
fn test_jobs_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_hub(&config_path, &["init"]);

    let (_, stderr, success) = run_hub(&config_path, &["jobs"]);
    assert!(success, "jobs failed: stderr={}", stderr);

    let (_, _, success) = run_hub(&config_path, &["jobs", "missing-job"]);
    assert!(!success);
}

#[test]
fn test_chat_requires_mode_value() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_hub(&config_path, &["chat", "hello", "--mode", "oracle"]);
    assert!(!success);
    assert!(stderr.contains("oracle"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/data/hub.sqlite\"\n\n[processing]\nmax_concurrent = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_hub(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("max_concurrent"));
}
