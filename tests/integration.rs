use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tw_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tw");
    path
}

const THREADS: &str = r#"[
  {
    "id": "t-budget",
    "subject": "Q3 budget",
    "messages": [
      {
        "id": "m1",
        "thread_id": "t-budget",
        "sender": "Alice <alice@example.com>",
        "recipients": ["bob@example.com"],
        "timestamp": "2024-07-01T09:00:00Z",
        "body": "The draft budget is attached.\n\nPlease review the travel lines."
      },
      {
        "id": "m2",
        "thread_id": "t-budget",
        "sender": "Bob <bob@example.com>",
        "timestamp": "2024-07-01T10:30:00Z",
        "kind": "reply",
        "body": "Travel is over by ten percent. Can we trim it?"
      }
    ]
  },
  {
    "id": "t-hiring",
    "subject": "Hiring plan",
    "messages": [
      {
        "id": "m3",
        "thread_id": "t-hiring",
        "sender": "carol@example.com",
        "timestamp": "2024-07-02T08:00:00Z",
        "body": "Two backend roles open next quarter."
      }
    ]
  }
]"#;

fn setup_test_env(config: &str) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("tw.toml");
    fs::write(&config_path, config).unwrap();

    let threads_path = root.join("threads.json");
    fs::write(&threads_path, THREADS).unwrap();

    (tmp, config_path, threads_path)
}

fn run_tw(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tw_binary();
    let output = Command::new(&binary)
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tw binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn units(stdout: &str) -> Vec<Value> {
    let value: Value = serde_json::from_str(stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout));
    value.as_array().cloned().unwrap()
}

#[test]
fn test_chunk_prints_detail_units() {
    let (_tmp, config_path, threads) = setup_test_env("");

    let (stdout, stderr, success) = run_tw(
        &config_path,
        &["chunk", threads.to_str().unwrap(), "--project", "acme"],
    );
    assert!(success, "chunk failed: stdout={}, stderr={}", stdout, stderr);

    let units = units(&stdout);
    let ids: Vec<&str> = units.iter().map(|u| u["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["t-budget:0", "t-hiring:0"]);
    for u in &units {
        assert_eq!(u["level"], "detail");
        assert_eq!(u["metadata"]["project_id"], "acme");
        assert_eq!(u["metadata"]["source_type"], "gmail");
    }
    let text = units[0]["text"].as_str().unwrap();
    assert!(text.starts_with("**From: Alice <alice@example.com> (2024-07-01 09:00)**"));
    assert!(text.contains("Travel is over by ten percent."));
}

#[test]
fn test_chunk_with_summary_puts_summary_first() {
    let (_tmp, config_path, threads) = setup_test_env("");

    let (stdout, stderr, success) = run_tw(
        &config_path,
        &["chunk", threads.to_str().unwrap(), "--summary"],
    );
    assert!(success, "chunk failed: stderr={}", stderr);

    let units = units(&stdout);
    let ids: Vec<&str> = units.iter().map(|u| u["id"].as_str().unwrap()).collect();
    assert_eq!(
        ids,
        vec!["t-budget:summary", "t-budget:0", "t-hiring:summary", "t-hiring:0"]
    );
    assert_eq!(units[0]["level"], "summary");
    assert_eq!(units[0]["metadata"]["project_id"], "default");
}

#[test]
fn test_small_chunk_size_splits_thread() {
    let config = r#"
[chunking]
chunk_size = 64
chunk_overlap = 8
tokenizer = "words"

[chunking.context]
max_tokens = 24
"#;
    let (_tmp, config_path, threads) = setup_test_env(config);

    let (stdout, stderr, success) = run_tw(&config_path, &["chunk", threads.to_str().unwrap()]);
    assert!(success, "chunk failed: stderr={}", stderr);

    let budget: Vec<Value> = units(&stdout)
        .into_iter()
        .filter(|u| u["thread_id"] == "t-budget")
        .collect();
    assert!(budget.len() >= 2, "expected a split, got {}", stdout);
    for (i, u) in budget.iter().enumerate() {
        assert_eq!(u["metadata"]["position"], i);
        assert!(u["token_count"].as_u64().unwrap() <= 64);
    }
    assert!(budget[1]["metadata"]["thread_context"]
        .as_str()
        .unwrap()
        .starts_with("[Thread: Q3 budget"));
}

#[test]
fn test_summarize_is_extractive() {
    let (_tmp, config_path, threads) = setup_test_env("");

    let (stdout, stderr, success) = run_tw(
        &config_path,
        &["summarize", threads.to_str().unwrap(), "--project", "acme"],
    );
    assert!(success, "summarize failed: stderr={}", stderr);
    assert!(stderr.contains("summarized thread"));

    let units = units(&stdout);
    assert_eq!(units.len(), 2);
    let text = units[0]["text"].as_str().unwrap();
    assert!(text.starts_with("Thread: Q3 budget"));
    assert!(text.contains("The draft budget is attached."));
    assert_eq!(
        units[0]["metadata"]["source_message_ids"],
        serde_json::json!(["m1", "m2"])
    );
}

#[test]
fn test_config_prints_effective_toml() {
    let (_tmp, config_path, _) = setup_test_env("[retrieval]\nsummary_top_k = 4\n");

    let (stdout, stderr, success) = run_tw(&config_path, &["config"]);
    assert!(success, "config failed: stderr={}", stderr);
    assert!(stdout.contains("[chunking]"));
    assert!(stdout.contains("chunk_size = 512"));
    assert!(stdout.contains("tokenizer = \"cl100k_base\""));
    assert!(stdout.contains("summary_top_k = 4"));
    assert!(stdout.contains("[logging]"));
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_tw(&tmp.path().join("absent.toml"), &["config"]);
    assert!(success);
    assert!(stdout.contains("chunk_size = 512"));
    assert!(stdout.contains("hierarchical = true"));
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path, threads) =
        setup_test_env("[chunking]\nchunk_size = 100\nchunk_overlap = 50\n");

    let (_, stderr, success) = run_tw(&config_path, &["chunk", threads.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("[chunking]"), "stderr: {}", stderr);
}

#[test]
fn test_missing_thread_file_fails() {
    let (tmp, config_path, _) = setup_test_env("");
    let missing = tmp.path().join("nope.json");

    let (_, stderr, success) = run_tw(&config_path, &["chunk", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read thread file"));
}
