//! Drives the `docrag` binary. Only commands that need no remote services
//! are exercised here.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn docrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docrag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/docrag.sqlite"

[chunking]
chunk_size = 500
chunk_overlap = 50

[logging]
level = "warn"
"#,
        root.display()
    );
    let config_path = config_dir.join("docrag.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(docrag_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("failed to run docrag")
}

#[test]
fn init_creates_database_and_is_idempotent() {
    let (tmp, config) = setup_test_env();

    let output = run(&config, &["init"]);
    assert!(
        output.status.success(),
        "init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Database initialized"));
    assert!(tmp.path().join("data").join("docrag.sqlite").exists());

    let output = run(&config, &["init"]);
    assert!(output.status.success());
}

#[test]
fn commands_before_init_explain_what_to_do() {
    let (_tmp, config) = setup_test_env();
    let output = run(&config, &["list", "--owner", "42"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("docrag init"));
}

#[test]
fn missing_api_key_is_reported() {
    let (_tmp, config) = setup_test_env();
    assert!(run(&config, &["init"]).status.success());

    let output = run(&config, &["stats", "doc", "--owner", "42"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("OPENAI_API_KEY"));
}

#[test]
fn invalid_config_is_rejected() {
    let (_tmp, config) = setup_test_env();
    fs::write(
        &config,
        "[db]\npath = \"x.sqlite\"\n\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
    )
    .unwrap();
    let output = run(&config, &["init"]);
    assert!(!output.status.success());
}

#[test]
fn missing_config_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let output = run(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}
