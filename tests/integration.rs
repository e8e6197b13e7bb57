use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn tome_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tome");
    path
}

const CATALOG: &str = r#"{"id": 1, "title": "The Dragon Keep", "authors": ["Ann Field"], "publication_year": 1994, "average_rating": 4.6, "ratings_count": 1200, "image_url": "http://img/1"}
{"id": 2, "title": "Ledger Days", "authors": ["Ann Field", "Bo Reyes"], "publication_year": 1990, "average_rating": 3.1, "ratings_count": 80}
{"id": 3, "title": "Glass Harbors", "authors": ["Bo Reyes"], "publication_year": 2003, "average_rating": "4.0", "ratings_count": null}
{"id": 4, "title": "Undated Notes", "authors": ["Cal Moss"]}
"#;

fn setup_test_env(catalog: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("books.jsonl"), catalog).unwrap();

    let config_content = format!(
        r#"[catalog]
path = "{root}/books.jsonl"

[index]
path = "{root}/data/tome.sqlite"

[embedding]
provider = "hash"
dims = 256

[retrieval]
k = 50
"#,
        root = root.display()
    );

    let config_path = root.join("config").join("tome.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tome(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_tome_with_input(config_path, args, None)
}

fn run_tome_with_input(
    config_path: &Path,
    args: &[&str],
    input: Option<&str>,
) -> (String, String, bool) {
    let binary = tome_binary();
    let mut command = Command::new(&binary);
    command
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = if let Some(text) = input {
        command.stdin(Stdio::piped());
        let mut child = command
            .spawn()
            .unwrap_or_else(|e| panic!("Failed to run tome binary at {:?}: {}", binary, e));
        child
            .stdin
            .as_mut()
            .unwrap()
            .write_all(text.as_bytes())
            .unwrap();
        child.wait_with_output().unwrap()
    } else {
        command
            .output()
            .unwrap_or_else(|e| panic!("Failed to run tome binary at {:?}: {}", binary, e))
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_index_builds_and_reports_counts() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    let (stdout, stderr, success) = run_tome(&config_path, &["index"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("index built"));
    // 4 books + 3 authors + 2 decades + 3 rated = 12 documents
    assert!(stdout.contains("documents: 12"), "stdout: {}", stdout);
    assert!(stdout.contains("Book: 4"));
    assert!(stdout.contains("AuthorAggregate: 3"));
    assert!(stdout.contains("DecadeAggregate: 2"));
    assert!(stdout.contains("TopRated: 3"));
}

#[test]
fn test_index_is_not_rebuilt_without_flag() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    let (_, _, success) = run_tome(&config_path, &["index"]);
    assert!(success);

    let (stdout, _, success) = run_tome(&config_path, &["index"]);
    assert!(success);
    assert!(stdout.contains("already exists"));

    let (stdout, _, success) = run_tome(&config_path, &["index", "--rebuild"]);
    assert!(success);
    assert!(stdout.contains("index built"));
}

#[test]
fn test_search_finds_matching_book() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    run_tome(&config_path, &["index"]);
    let (stdout, stderr, success) =
        run_tome(&config_path, &["search", "Dragon Keep", "--limit", "3"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("The Dragon Keep"), "stdout: {}", stdout);
    assert!(stdout.lines().next().unwrap().starts_with("1."));
}

#[test]
fn test_search_results_survive_reload_unchanged() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    // First run builds the index and queries it; the second run loads the
    // persisted bundle. Identical output means identical ids and order.
    let (first, _, success) = run_tome(&config_path, &["search", "books from the 1990s"]);
    assert!(success);
    let (second, _, success) = run_tome(&config_path, &["search", "books from the 1990s"]);
    assert!(success);
    assert_eq!(first, second);
}

#[test]
fn test_search_empty_catalog_returns_no_results() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, success) = run_tome(&config_path, &["index"]);
    assert!(success);
    let (stdout, _, success) = run_tome(&config_path, &["search", "anything"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stats_summarizes_the_bundle() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    run_tome(&config_path, &["index"]);
    let (stdout, stderr, success) = run_tome(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Documents:   12"));
    assert!(stdout.contains("Vectors:     12 / 12 (100%)"));
    assert!(stdout.contains("hash (256 dims)"));
}

#[test]
fn test_stats_without_index_fails() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    let (_, stderr, success) = run_tome(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("tome index"), "stderr: {}", stderr);
}

#[test]
fn test_chat_quits_on_q_without_generating() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    // "q" (however cased or padded) must end the loop with a zero status
    // before any model call happens.
    let (stdout, stderr, success) = run_tome_with_input(&config_path, &["chat"], Some("  Q  \n"));
    assert!(success, "chat failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Book Q&A"));
    assert!(stdout.contains("Goodbye."));
}

#[test]
fn test_chat_quits_on_end_of_input() {
    let (_tmp, config_path) = setup_test_env(CATALOG);

    let (stdout, _, success) = run_tome_with_input(&config_path, &["chat"], Some(""));
    assert!(success);
    assert!(stdout.contains("Book Q&A"));
}

#[test]
fn test_missing_catalog_is_a_load_error() {
    let (tmp, config_path) = setup_test_env(CATALOG);
    fs::remove_file(tmp.path().join("books.jsonl")).unwrap();

    let (_, stderr, success) = run_tome(&config_path, &["index"]);
    assert!(!success);
    assert!(stderr.contains("failed to load catalog"), "stderr: {}", stderr);
}

#[test]
fn test_malformed_catalog_line_is_a_load_error() {
    let (_tmp, config_path) = setup_test_env("{\"id\": 1}\nnot json at all\n");

    let (_, stderr, success) = run_tome(&config_path, &["index"]);
    assert!(!success);
    assert!(stderr.contains("line 2"), "stderr: {}", stderr);
}

#[test]
fn test_corrupt_bundle_is_an_index_error() {
    let (tmp, config_path) = setup_test_env(CATALOG);
    fs::write(tmp.path().join("data").join("tome.sqlite"), "garbage").unwrap();

    let (_, stderr, success) = run_tome(&config_path, &["search", "anything"]);
    assert!(!success);
    assert!(stderr.contains("is unusable"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, config_path) = setup_test_env(CATALOG);
    let bad = fs::read_to_string(&config_path)
        .unwrap()
        .replace("provider = \"hash\"", "provider = \"openai\"");
    fs::write(tmp.path().join("config").join("tome.toml"), bad).unwrap();

    let (_, stderr, success) = run_tome(&config_path, &["index"]);
    assert!(!success);
    assert!(stderr.contains("invalid configuration"), "stderr: {}", stderr);
}
