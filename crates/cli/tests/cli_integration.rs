//! CLI integration tests for the one-shot subcommands.
//!
//! Uses `assert_cmd` to spawn the `labseq` binary and verify exit codes,
//! stdout content, and stderr content. Commands run from the workspace root
//! so `demos/` paths resolve.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Locate the workspace root by walking up from CARGO_MANIFEST_DIR.
fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

/// Helper: create a Command for the `labseq` binary, rooted at workspace.
fn labseq() -> Command {
    let mut cmd = cargo_bin_cmd!("labseq");
    cmd.current_dir(workspace_root());
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Write `contents` to `name` inside a fresh temp dir.
fn write_temp(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write temp file");
    (dir, path)
}

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    labseq()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Lab device test sequencer"));
}

#[test]
fn version_exits_0() {
    labseq()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("labseq"));
}

#[test]
fn serve_help_lists_flags() {
    labseq()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--port"))
        .stdout(predicate::str::contains("--data"));
}

// ──────────────────────────────────────────────
// 2. Resolve
// ──────────────────────────────────────────────

#[test]
fn resolve_separator_and_prefix() {
    labseq()
        .args(["resolve", "LNA6213-001", "LNP4216007"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LNA6213-001\tLNA6213"))
        .stdout(predicate::str::contains("LNP4216007\tLNP4216"));
}

#[test]
fn resolve_unknown_serial_exits_1() {
    labseq()
        .args(["resolve", "LNA6213-001", "ABC123"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("LNA6213"))
        .stderr(predicate::str::contains("ABC123"));
}

#[test]
fn resolve_json_output() {
    let output = labseq()
        .args(["--output", "json", "resolve", "LN65S-FC-12", "ZZZ"])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON");
    assert_eq!(json[0]["device_type"], "LN65S");
    assert!(json[1]["device_type"].is_null());
}

#[test]
fn resolve_uses_config_prefixes() {
    let (_dir, config) = write_temp(
        "labseq.toml",
        "separator = \"_\"\ndevice_type_prefixes = [\"ACME9\"]\n",
    );
    labseq()
        .args(["--config", config.to_str().unwrap(), "resolve", "ACME9001", "LNA6213_4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ACME9001\tACME9"))
        .stdout(predicate::str::contains("LNA6213_4\tLNA6213"));
}

#[test]
fn missing_config_file_exits_1() {
    labseq()
        .args(["--config", "does/not/exist.toml", "resolve", "LNA6213-001"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("does/not/exist.toml"));
}

// ──────────────────────────────────────────────
// 3. Validate
// ──────────────────────────────────────────────

#[test]
fn validate_demo_data_exits_0() {
    labseq()
        .args(["validate", "demos/lab-data.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LNA6213: 5 tests (4 required)"))
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn validate_reports_malformed_sequence() {
    let (_dir, data) = write_temp(
        "lab-data.json",
        r#"{
  "device_test_sequences": {
    "GOOD": [{"test_id": "T1", "sequence_order": 1, "is_required": true}],
    "DUPED": [
      {"test_id": "T1", "sequence_order": 1, "is_required": true},
      {"test_id": "T2", "sequence_order": 1, "is_required": true}
    ]
  }
}"#,
    );
    labseq()
        .args(["validate", data.to_str().unwrap()])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("GOOD: 1 tests (1 required)"))
        .stderr(predicate::str::contains("DUPED"))
        .stderr(predicate::str::contains("duplicate sequence_order"));
}

#[test]
fn validate_json_output() {
    let (_dir, data) = write_temp(
        "lab-data.json",
        r#"{"device_test_sequences": {"BAD": {"test_id": "T1"}}}"#,
    );
    let output = labseq()
        .args(["--output", "json", "validate", data.to_str().unwrap()])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON");
    assert_eq!(json["valid"], false);
    assert_eq!(json["device_types"][0]["device_type"], "BAD");
    assert!(json["device_types"][0]["error"].is_string());
}

#[test]
fn validate_nonexistent_file_exits_1() {
    labseq()
        .args(["validate", "nonexistent.json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("nonexistent.json"));
}

#[test]
fn validate_quiet_suppresses_output() {
    labseq()
        .args(["--quiet", "validate", "demos/lab-data.json"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ──────────────────────────────────────────────
// 4. Preview
// ──────────────────────────────────────────────

#[test]
fn preview_text_lists_tests_in_order() {
    labseq()
        .args(["preview", "demos/lab-data.json", "LNA6213"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Chip Inspection"))
        .stdout(predicate::str::contains("5 tests (4 required, 1 optional)"));
}

#[test]
fn preview_json_has_summary() {
    let output = labseq()
        .args(["--output", "json", "preview", "demos/lab-data.json", "LNA6213"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).expect("valid JSON");
    assert_eq!(json["device_type"], "LNA6213");
    assert_eq!(json["tests"][0]["test_id"], "CHIP_INSPECTION");
    assert_eq!(json["tests"][4]["is_required"], false);
    assert_eq!(json["summary"]["total_required_time_minutes"], 110);
    assert_eq!(json["summary"]["total_optional_time_minutes"], 60);
    assert_eq!(json["summary"]["estimated_total_hours"], 2.8);
}

#[test]
fn preview_unknown_device_type_exits_1() {
    labseq()
        .args(["preview", "demos/lab-data.json", "NOPE"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("NOPE"));
}
