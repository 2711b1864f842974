use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn kbh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kbh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("rutiner")).unwrap();
    fs::write(
        files_dir.join("hjartsvikt.md"),
        "# Hjärtsvikt\n\nBehandling av hjärtsvikt på avdelningen.\n\n- vikt dagligen\n- vätskelista",
    )
    .unwrap();
    fs::write(
        files_dir.join("rutiner").join("telemetri.txt"),
        "Telemetri kopplas vid misstänkt arytmi.\n\nLarmgränser enligt ordination.",
    )
    .unwrap();
    fs::write(files_dir.join("~$lås.docx"), "lock").unwrap();
    fs::write(files_dir.join("tom.md"), "  \n  ").unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/kb.sqlite"

[sources]
roots = ["{root}/files"]

[retrieval]
default_limit = 5
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kbh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kbh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kbh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_kbh_stdin(config_path: &Path, args: &[&str], input: &str) -> (String, bool) {
    let mut child = Command::new(kbh_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        output.status.success(),
    )
}

fn parse_lines(stdout: &str) -> Vec<serde_json::Value> {
    stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_init_creates_db() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_kbh(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data").join("kb.sqlite").exists());

    // idempotent
    let (_, stderr, success) = run_kbh(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_kbh(&config_path, &["ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(
        stdout.contains("Indexed 2 files, skipped 1. DB:"),
        "unexpected output: {}",
        stdout
    );
    assert!(stdout.contains(&tmp.path().join("data").join("kb.sqlite").display().to_string()));
}

#[test]
fn test_ingest_src_overrides_roots() {
    let (tmp, config_path) = setup_test_env();
    let only = tmp.path().join("files").join("rutiner");
    let (stdout, stderr, success) =
        run_kbh(&config_path, &["ingest", "--src", only.to_str().unwrap()]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(stdout.contains("Indexed 1 files, skipped 0."));
}

#[test]
fn test_db_flag_overrides_config() {
    let (tmp, config_path) = setup_test_env();
    let other = tmp.path().join("elsewhere").join("other.sqlite");
    let (_, stderr, success) =
        run_kbh(&config_path, &["--db", other.to_str().unwrap(), "ingest"]);
    assert!(success, "ingest failed: {}", stderr);
    assert!(other.exists());
    assert!(!tmp.path().join("data").join("kb.sqlite").exists());
}

#[test]
fn test_search_after_ingest() {
    let (_tmp, config_path) = setup_test_env();
    run_kbh(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_kbh(&config_path, &["search", "hjärtsvikt"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("hjartsvikt.md"));
    assert!(stdout.contains("<b>"));

    let (stdout, _, success) = run_kbh(&config_path, &["search", "nonexistentterm"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_json_envelope() {
    let (_tmp, config_path) = setup_test_env();
    run_kbh(&config_path, &["ingest"]);

    let (stdout, stderr, success) =
        run_kbh(&config_path, &["search", "telemetri", "--json", "--limit", "1"]);
    assert!(success, "search failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["success"], serde_json::json!(true));
    let data = value["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["title"], serde_json::json!("telemetri"));
    assert!(data[0]["score"].as_f64().unwrap() < 0.0);
}

#[test]
fn test_get_by_path() {
    let (tmp, config_path) = setup_test_env();
    run_kbh(&config_path, &["ingest"]);

    let path = tmp
        .path()
        .join("files")
        .join("rutiner")
        .join("telemetri.txt")
        .canonicalize()
        .unwrap();
    let (stdout, stderr, success) =
        run_kbh(&config_path, &["get", path.to_str().unwrap(), "--json"]);
    assert!(success, "get failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        value["data"]["content"],
        serde_json::json!("Telemetri kopplas vid misstänkt arytmi. Larmgränser enligt ordination.")
    );

    let (stdout, _, success) = run_kbh(&config_path, &["get", "/no/such.txt", "--json"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value, serde_json::json!({"success": true, "data": null}));

    let (_, stderr, success) = run_kbh(&config_path, &["get", "/no/such.txt"]);
    assert!(!success);
    assert!(stderr.contains("document not found"));
}

#[test]
fn test_status_counts_documents() {
    let (_tmp, config_path) = setup_test_env();
    run_kbh(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_kbh(&config_path, &["status"]);
    assert!(success, "status failed: {}", stderr);
    assert!(stdout.contains("Documents: 2"));
}

#[test]
fn test_tools_lists_methods() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_kbh(&config_path, &["tools"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let tools = value["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 3);
    assert_eq!(tools[0]["name"], serde_json::json!("search_knowledge"));
    assert_eq!(
        tools[0]["parameters"]["properties"]["max_results"]["default"],
        serde_json::json!(5)
    );
}

#[test]
fn test_serve_line_mode() {
    let (_tmp, config_path) = setup_test_env();
    run_kbh(&config_path, &["ingest"]);

    let input = concat!(
        r#"{"id": 1, "method": "search_knowledge", "params": {"query": "arytmi"}}"#,
        "\n",
        r#"{"id": 2, "method": "nope"}"#,
        "\n",
        "not json\n"
    );
    let (stdout, success) = run_kbh_stdin(&config_path, &["serve"], input);
    assert!(success);
    let responses = parse_lines(&stdout);
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["id"], serde_json::json!(1));
    assert_eq!(responses[0]["data"].as_array().unwrap().len(), 1);
    assert_eq!(responses[1]["code"], serde_json::json!("unknown_method"));
    assert_eq!(responses[2]["code"], serde_json::json!("parse_error"));
}

#[test]
fn test_serve_once_mode() {
    let (_tmp, config_path) = setup_test_env();
    run_kbh(&config_path, &["ingest"]);

    let input = "{\n \"method\": \"search_knowledge\",\n \"params\": {\"query\": \"vätskelista\"}\n}";
    let (stdout, success) = run_kbh_stdin(&config_path, &["serve", "--once"], input);
    assert!(success);
    let responses = parse_lines(&stdout);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["success"], serde_json::json!(true));
    assert_eq!(responses[0]["data"].as_array().unwrap().len(), 1);
}

#[test]
fn test_missing_explicit_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_kbh(&tmp.path().join("absent.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("kb.toml");
    fs::write(&config_path, "[retrieval]\ndefault_limit = 0\n").unwrap();
    let (_, stderr, success) = run_kbh(&config_path, &["status"]);
    assert!(!success);
    assert!(stderr.contains("default_limit"));
}

#[test]
fn test_query_does_not_create_missing_store() {
    let (tmp, config_path) = setup_test_env();
    let absent = tmp.path().join("nowhere").join("kb.sqlite");

    let (_, stderr, success) =
        run_kbh(&config_path, &["--db", absent.to_str().unwrap(), "search", "arytmi"]);
    assert!(!success);
    assert!(stderr.contains("Failed to open store"), "{}", stderr);
    assert!(!absent.exists());
    assert!(!absent.parent().unwrap().exists());
}

#[test]
fn test_serve_reports_unavailable_store() {
    let (tmp, config_path) = setup_test_env();
    let absent = tmp.path().join("nowhere").join("kb.sqlite");

    let input = concat!(
        r#"{"id": 1, "method": "search_knowledge", "params": {"query": "arytmi"}}"#,
        "\n",
        "not json\n"
    );
    let (stdout, success) =
        run_kbh_stdin(&config_path, &["--db", absent.to_str().unwrap(), "serve"], input);
    assert!(success);
    let responses = parse_lines(&stdout);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["success"], serde_json::json!(false));
    assert_eq!(responses[0]["id"], serde_json::json!(1));
    assert!(responses[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("store unavailable"));
    assert_eq!(responses[1]["code"], serde_json::json!("parse_error"));
    assert!(!absent.exists());
}
