use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragchat");
    path
}

/// A working directory with a `config.toml` keeping every path inside it.
fn setup_test_env() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        r#"index_path = "indexes"
docs_path = "docs"
cache_path = "cache"
error_log_path = "error.log"
ollama_url = "http://127.0.0.1:9"
max_retries = 0
"#,
    )
    .unwrap();
    tmp
}

fn run_ragchat(dir: &Path, args: &[&str], env: &[(&str, &str)]) -> (String, String, bool) {
    let binary = ragchat_binary();
    let output = Command::new(&binary)
        .current_dir(dir)
        .args(args)
        .envs(env.iter().copied())
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ragchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_empty_docs_dir_exits_cleanly() {
    let tmp = setup_test_env();

    let (stdout, stderr, success) = run_ragchat(tmp.path(), &[], &[]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("No documents found in 'docs' folder"));

    for dir in ["indexes", "docs", "cache"] {
        assert!(tmp.path().join(dir).is_dir(), "{} was not created", dir);
    }
}

#[test]
fn test_missing_file_fails_and_is_logged() {
    let tmp = setup_test_env();

    let (_stdout, stderr, success) = run_ragchat(tmp.path(), &["ghost.txt"], &[]);
    assert!(!success);
    assert!(stderr.contains("Failed to initialize RAG session"));
    assert!(stderr.contains("ghost.txt"));

    let log = fs::read_to_string(tmp.path().join("error.log")).unwrap();
    assert!(log.contains("--- FileNotFound ("));
}

#[test]
fn test_unsupported_extension_fails() {
    let tmp = setup_test_env();
    fs::write(tmp.path().join("slides.rst"), "Title\n=====\n").unwrap();

    let (_stdout, stderr, success) = run_ragchat(tmp.path(), &["slides.rst"], &[]);
    assert!(!success);
    assert!(stderr.contains("Failed to initialize RAG session"));
    assert!(stderr.contains("unsupported file format '.rst'"));

    let log = fs::read_to_string(tmp.path().join("error.log")).unwrap();
    assert!(log.contains("--- UnsupportedFormat"));
    assert!(!tmp.path().join("indexes").join("slides_vector_index").exists());
}

#[test]
fn test_malformed_env_override_is_fatal() {
    let tmp = setup_test_env();

    let (_stdout, stderr, success) =
        run_ragchat(tmp.path(), &[], &[("RAG_CHUNK_SIZE", "large")]);
    assert!(!success);
    assert!(stderr.contains("invalid value for RAG_CHUNK_SIZE: 'large'"));
}

#[test]
fn test_unknown_config_key_is_fatal() {
    let tmp = setup_test_env();
    fs::write(tmp.path().join("custom.toml"), "chunk_sise = 10\n").unwrap();

    let (_stdout, stderr, success) =
        run_ragchat(tmp.path(), &["--config", "custom.toml"], &[]);
    assert!(!success);
    assert!(stderr.contains("failed to parse config file"));
}

#[test]
fn test_env_overrides_docs_path() {
    let tmp = setup_test_env();
    fs::create_dir_all(tmp.path().join("elsewhere")).unwrap();

    let (stdout, stderr, success) =
        run_ragchat(tmp.path(), &[], &[("RAG_DOCS_PATH", "elsewhere")]);
    assert!(success, "stderr: {}", stderr);
    assert!(stdout.contains("No documents found in 'elsewhere' folder"));
}

#[test]
fn test_version_flag() {
    let tmp = setup_test_env();
    let (stdout, _stderr, success) = run_ragchat(tmp.path(), &["--version"], &[]);
    assert!(success);
    assert!(stdout.starts_with("ragchat "));
}
