use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn scribe_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("scribe");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // A small extracted repository for `file` jobs
    let repo_dir = root.join("repo");
    fs::create_dir_all(repo_dir.join("src/cli")).unwrap();
    fs::create_dir_all(repo_dir.join("node_modules/left-pad")).unwrap();
    fs::write(repo_dir.join("README.md"), "# Demo\n\nA tiny demo tool.").unwrap();
    fs::write(repo_dir.join("Cargo.toml"), "[package]\nname = \"demo\"").unwrap();
    fs::write(repo_dir.join("src/main.rs"), "fn main() {}").unwrap();
    fs::write(repo_dir.join("src/cli/args.rs"), "pub struct Args;").unwrap();
    fs::write(repo_dir.join("node_modules/left-pad/index.js"), "x").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/scribe.sqlite"

[acquisition]
repositories_dir = "{}/data/repositories"

[commits]
enabled = false

[logging]
level = "warn"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("scribe.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_scribe(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = scribe_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run scribe binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn submit_repo(tmp: &TempDir, config_path: &Path) -> String {
    let repo = tmp.path().join("repo");
    let (stdout, stderr, success) = run_scribe(
        config_path,
        &["submit", repo.to_str().unwrap(), "--kind", "file"],
    );
    assert!(success, "submit failed: stdout={}, stderr={}", stdout, stderr);
    stdout.trim().to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_scribe(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/scribe.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_scribe(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_scribe(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_submit_and_list() {
    let (tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let id = submit_repo(&tmp, &config_path);
    assert_eq!(id.len(), 36, "expected a UUID, got: {}", id);

    let (stdout, _, success) = run_scribe(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains(&id));
    assert!(stdout.contains("Pending"));
    assert!(stdout.contains("file"));
}

#[test]
fn test_list_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let (stdout, _, success) = run_scribe(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("No jobs."));
}

#[test]
fn test_status_unknown_job_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let (_, stderr, success) = run_scribe(&config_path, &["status", "no-such-job"]);
    assert!(!success);
    assert!(stderr.contains("job not found"));
}

#[test]
fn test_run_once_without_provider_fails_job() {
    let (tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);
    let id = submit_repo(&tmp, &config_path);

    let (stdout, stderr, success) = run_scribe(&config_path, &["run", "--once"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains(&format!("Job {} failed.", id)));

    let (stdout, _, _) = run_scribe(&config_path, &["status", &id]);
    assert!(stdout.contains("Status:         Failed"));
    assert!(stdout.contains("disabled"), "expected provider error, got: {}", stdout);
    assert!(!stdout.contains("Document:"), "document record should be cleared");

    // Nothing left to pick up
    let (stdout, _, _) = run_scribe(&config_path, &["run", "--once"]);
    assert!(stdout.contains("No runnable job."));
}

#[test]
fn test_retry_requeues_failed_job() {
    let (tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);
    let id = submit_repo(&tmp, &config_path);
    run_scribe(&config_path, &["run", "--once"]);

    let (stdout, _, success) = run_scribe(&config_path, &["retry", &id]);
    assert!(success);
    assert!(stdout.contains("Failed -> Pending"));

    let (stdout, _, _) = run_scribe(&config_path, &["status", &id]);
    assert!(stdout.contains("Status:         Pending"));
    assert!(!stdout.contains("Error:"));
}

#[test]
fn test_reset_deletes_job() {
    let (tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);
    let id = submit_repo(&tmp, &config_path);

    let (_, _, success) = run_scribe(&config_path, &["reset", &id]);
    assert!(success);

    let (stdout, _, _) = run_scribe(&config_path, &["list"]);
    assert!(!stdout.contains(&id));
}

#[test]
fn test_tree_formats() {
    let (tmp, config_path) = setup_test_env();
    let repo = tmp.path().join("repo");
    let repo = repo.to_str().unwrap();

    let (stdout, _, success) = run_scribe(&config_path, &["tree", repo]);
    assert!(success);
    assert!(stdout.contains("src/D"));
    assert!(stdout.contains("  main.rs/F"));
    assert!(!stdout.contains("node_modules"));

    let (stdout, _, _) = run_scribe(&config_path, &["tree", repo, "--format", "paths"]);
    assert!(stdout.lines().any(|l| l == "src/"));
    assert!(stdout.lines().any(|l| l == "src/cli/args.rs"));
    assert!(!stdout.lines().any(|l| l == "src/cli/"));

    let (stdout, _, _) = run_scribe(&config_path, &["tree", repo, "--format", "unix"]);
    assert!(stdout.starts_with(".\n"));
    assert!(stdout.contains("└── "));

    let (stdout, _, _) = run_scribe(&config_path, &["tree", repo, "--format", "json"]);
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(value["src"]["main.rs"], "F");
}

#[test]
fn test_tree_works_without_config() {
    let (tmp, _config_path) = setup_test_env();
    let missing = tmp.path().join("missing.toml");
    let repo = tmp.path().join("repo");

    let (stdout, _, success) = run_scribe(&missing, &["tree", repo.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("README.md/F"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("missing.toml");

    let (_, _, success) = run_scribe(&missing, &["list"]);
    assert!(!success);
}

#[test]
fn test_invalid_config_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("scribe.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/scribe.sqlite\"\n\n[generator]\nmax_concurrency = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_scribe(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("max_concurrency"));
}
