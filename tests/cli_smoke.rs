use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn find_beer_binary() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_beer") {
        return PathBuf::from(path);
    }

    let current = std::env::current_exe().expect("failed to get current exe path");
    let deps_dir = current
        .parent()
        .expect("failed to get deps dir from current exe")
        .to_path_buf();
    let debug_dir = deps_dir
        .parent()
        .expect("failed to get debug dir from deps dir")
        .to_path_buf();

    let direct = debug_dir.join("beer");
    if direct.exists() {
        return direct;
    }

    for entry in fs::read_dir(&deps_dir).expect("failed to read target deps dir") {
        let entry = entry.expect("failed to read deps entry");
        let path = entry.path();
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if !name.starts_with("beer-") || name.starts_with("beer_rs") {
            continue;
        }
        if name.ends_with(".d") || name.ends_with(".rlib") || name.ends_with(".rmeta") {
            continue;
        }
        if path.is_file() {
            return path;
        }
    }

    panic!("failed to find beer binary in CARGO_BIN_EXE_beer or target/debug");
}

const SCENARIO: &str = r#"{
  "state_count": 4,
  "branch_lengths": [0.1, 0.2, 0.15, 0.05, 0.0],
  "operations": [[0, 1, 3], [3, 2, 4]],
  "tips": [
    {"node": 0, "sequence": "ACGTTGCAAN"},
    {"node": 1, "sequence": "ACGTTGCTAA"},
    {"node": 2, "sequence": "ACCTTGCAGA"}
  ],
  "rates": [0.5, 1.5],
  "proportions": [0.5, 0.5]
}"#;

#[test]
fn cli_evaluates_and_writes_json_report() {
    let input = unique_temp_path("beer_cli_input", "json");
    let output = unique_temp_path("beer_cli_output", "json");
    fs::write(&input, SCENARIO).expect("failed to write cli test input");

    let exe = find_beer_binary();
    let status = Command::new(exe)
        .arg(&input)
        .arg(&output)
        .arg("--iterations")
        .arg("25")
        .arg("--chains")
        .arg("2")
        .arg("--threads")
        .arg("2")
        .arg("--no-progress")
        .status()
        .expect("failed to run beer binary");
    assert!(status.success(), "beer exited with non-zero status");

    let out = fs::read_to_string(&output).expect("failed to read beer output json");
    let v: Value = serde_json::from_str(&out).expect("output json is invalid");
    assert_eq!(v["pattern_count"].as_u64(), Some(10));
    assert_eq!(v["node_count"].as_u64(), Some(5));
    assert!(v["log_likelihood"].as_f64().is_some_and(|ll| ll < 0.0));
    assert_eq!(
        v["pattern_log_likelihoods"].as_array().map(Vec::len),
        Some(10)
    );
    let chains = v["chains"].as_array().expect("chains should be an array");
    assert_eq!(chains.len(), 2);
    assert_eq!(chains[0]["iterations"].as_u64(), Some(25));

    let _ = fs::remove_file(input);
    let _ = fs::remove_file(output);
}

#[test]
fn cli_rejects_malformed_scenario() {
    let input = unique_temp_path("beer_cli_bad_input", "json");
    let output = unique_temp_path("beer_cli_bad_output", "json");
    fs::write(&input, r#"{"state_count": 4, "branch_lengths": [0.1]}"#)
        .expect("failed to write cli test input");

    let exe = find_beer_binary();
    let status = Command::new(exe)
        .arg(&input)
        .arg(&output)
        .arg("--no-progress")
        .status()
        .expect("failed to run beer binary");
    assert!(!status.success(), "beer should fail on a malformed scenario");
    assert!(!output.exists());

    let _ = fs::remove_file(input);
}
