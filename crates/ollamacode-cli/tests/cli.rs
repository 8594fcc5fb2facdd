use assert_cmd::Command;
use ollamacode_testkit::{MockOllamaServer, MockResponse, chat_record, stream_body};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn ollama_code(workspace: &Path, home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("ollama-code"));
    cmd.current_dir(workspace).env("HOME", home);
    cmd
}

fn classification(intent: &str, params: &str) -> MockResponse {
    let content =
        format!(r#"{{"intent": "{intent}", "parameters": {params}, "confidence": 0.92}}"#);
    MockResponse::ok(chat_record(&content, true))
}

#[test]
fn ask_streams_the_answer() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    let server = MockOllamaServer::start(vec![
        classification("question", "{}"),
        MockResponse::ok(stream_body(&["Ownership ", "moves ", "values."])),
    ]);

    let output = ollama_code(workspace.path(), home.path())
        .args(["--url", server.base_url(), "--model", "test-model"])
        .args(["ask", "what", "is", "ownership?"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&output);
    assert!(stdout.contains("Ownership moves values."), "{stdout}");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["stream"], false);
    assert_eq!(requests[0]["model"], "test-model");
    assert_eq!(requests[1]["stream"], true);
    let last = requests[1]["messages"]
        .as_array()
        .and_then(|m| m.last())
        .cloned()
        .expect("messages");
    assert_eq!(last["content"], "what is ownership?");
}

#[test]
fn ask_is_forced_read_only() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    let server = MockOllamaServer::start(vec![classification(
        "write_file",
        r#"{"file_path": "notes.txt", "content": "hi"}"#,
    )]);

    let output = ollama_code(workspace.path(), home.path())
        .args(["--url", server.base_url(), "--mode", "autonomous"])
        .args(["ask", "write hi to notes.txt"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("blocked"));
    assert!(!workspace.path().join("notes.txt").exists());
}

#[test]
fn backend_failure_exits_with_status_one() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    let server = MockOllamaServer::start(vec![MockResponse::status(500, "model exploded")]);

    let output = ollama_code(workspace.path(), home.path())
        .args(["--json", "--url", server.base_url()])
        .args(["ask", "hello"])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(json["intent"], "question");
    assert!(json["error"].as_str().is_some_and(|e| e.contains("500")));
}

#[test]
fn invalid_mode_is_rejected() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    let output = ollama_code(workspace.path(), home.path())
        .args(["--mode", "yolo", "ask", "hi"])
        .assert()
        .code(1)
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("invalid mode"));
}

#[test]
fn invalid_router_settings_abort_startup() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    let runtime = workspace.path().join(".ollama-code");
    fs::create_dir_all(&runtime).expect("runtime dir");
    fs::write(
        runtime.join("settings.json"),
        r#"{"router": {"enabled": true, "models": {"code": {"name": "m", "max_tokens": 0, "temperature": 0.2}}}}"#,
    )
    .expect("settings");

    let output = ollama_code(workspace.path(), home.path())
        .args(["config"])
        .assert()
        .code(1)
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("invalid model configuration"));
}

#[test]
fn repl_builtins_and_exit() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    let output = ollama_code(workspace.path(), home.path())
        .args(["--url", "http://127.0.0.1:9", "--mode", "autonomous", "chat"])
        .write_stdin("mode\npwd\n/nope\nclear\nexit\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&output);
    assert!(stdout.contains("mode: autonomous"), "{stdout}");
    let name = workspace
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .expect("temp dir name");
    assert!(stdout.contains(name));
    assert!(stdout.contains("❌ unknown command '/nope'"));
    assert!(stdout.contains("Conversation cleared."));
    assert!(stdout.contains("Goodbye."));
}

#[test]
fn repl_runs_the_initial_message_then_stops_at_eof() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    fs::write(workspace.path().join("lib.rs"), "pub fn answer() -> u32 { 42 }").expect("file");
    let server = MockOllamaServer::start(vec![classification(
        "read_file",
        r#"{"file_path": "lib.rs"}"#,
    )]);

    let output = ollama_code(workspace.path(), home.path())
        .args(["--url", server.base_url(), "chat", "show", "lib.rs"])
        .write_stdin("")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&output);
    assert!(stdout.contains("pub fn answer()"), "{stdout}");
    assert_eq!(server.requests().len(), 1);
}

#[test]
fn config_json_reflects_flag_overrides() {
    let workspace = TempDir::new().expect("workspace");
    let home = TempDir::new().expect("home");
    let output = ollama_code(workspace.path(), home.path())
        .args(["--json", "--model", "llama3:8b", "--mode", "read-only", "config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(json["router"]["enabled"], false);
    assert_eq!(json["router"]["default_model"]["name"], "llama3:8b");
    assert_eq!(json["agent"]["mode"], "read-only");
}
