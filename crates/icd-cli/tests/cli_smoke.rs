//! CLI binary smoke tests using assert_cmd.
//!
//! These tests run the compiled `icd` binary against small lookup files
//! written to a temporary directory.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn cmd() -> Command {
    Command::cargo_bin("icd").unwrap()
}

/// Writes vocabulary, codes and a config into `dir`, returning the config path.
fn write_run(dir: &Path, model: &str) -> std::path::PathBuf {
    fs::write(dir.join("vocab.csv"), "acute\nfailure\nheart\nkidney\n").unwrap();
    fs::write(dir.join("codes.txt"), "428.0\n584.9\n038.9\n").unwrap();
    fs::write(dir.join("descriptions.vocab"), "CODE VECTOR\n428.0 3 2\n").unwrap();
    let config = serde_json::json!({
        "model": model,
        "Y": "full",
        "vocab": dir.join("vocab.csv"),
        "codes": dir.join("codes.txt"),
        "embed_size": 6,
        "filter_size": "3",
        "num_filter_maps": 4,
        "rnn_dim": 4,
        "transformer_layers": 1,
        "transformer_heads": 2,
        "transformer_ff_dim": 8,
        "max_length": 32
    });
    let path = dir.join("run.json");
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Top-level
// ---------------------------------------------------------------------------

#[test]
fn no_args_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("params"))
        .stdout(predicate::str::contains("code-vecs"));
}

#[test]
fn models_lists_every_architecture() {
    cmd()
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("conv_attn_lco"))
        .stdout(predicate::str::contains("MultiResCNN"))
        .stdout(predicate::str::contains("bert_seq_cls"));
}

// ---------------------------------------------------------------------------
// build
// ---------------------------------------------------------------------------

#[test]
fn build_prints_summary_and_saves_weights() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_run(dir.path(), "conv_attn");
    let weights = dir.path().join("model.safetensors");

    cmd()
        .arg("build")
        .arg(&config)
        .arg("--save")
        .arg(&weights)
        .assert()
        .success()
        .stdout(predicate::str::contains("conv_attn Summary"))
        .stdout(predicate::str::contains("Labels: 3"));
    assert!(weights.exists());

    cmd()
        .arg("build")
        .arg(&config)
        .arg("--test-model")
        .arg(&weights)
        .assert()
        .success();
}

#[test]
fn build_model_flag_overrides_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_run(dir.path(), "conv_attn");

    cmd()
        .args(["build", config.to_str().unwrap(), "--model", "rnn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rnn Summary"));
}

#[test]
fn build_rejects_unknown_model_in_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_run(dir.path(), "not_a_model");

    cmd()
        .args(["build", config.to_str().unwrap()])
        .env("ICD_LOG", "error")
        .assert()
        .failure()
        .stderr(predicate::str::contains("wrong model name"));
}

#[test]
fn build_multitask() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_run(dir.path(), "MultiResCNN");
    let mut json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&config).unwrap()).unwrap();
    json["mode"] = serde_json::Value::from("sp-mtl");
    fs::write(&config, json.to_string()).unwrap();

    cmd()
        .args(["build", config.to_str().unwrap(), "--tasks", "ccs,icd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Task ccs: 3 labels"))
        .stdout(predicate::str::contains("Task icd: 3 labels"));
}

#[test]
fn build_nonexistent_config_errors() {
    cmd()
        .args(["build", "/nonexistent/run.json"])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// params / code-vecs
// ---------------------------------------------------------------------------

#[test]
fn params_writes_run_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_run(dir.path(), "conv_attn");
    let out = dir.path().join("run_dir");

    cmd()
        .arg("params")
        .arg(&config)
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"filter_size\": \"3\""))
        .stdout(predicate::str::contains("\"Y\": \"full\""));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("params.json")).unwrap()).unwrap();
    assert_eq!(written["num_filter_maps"], 4);
}

#[test]
fn code_vecs_pads_with_unknown_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_run(dir.path(), "conv_attn");

    let output = cmd()
        .arg("code-vecs")
        .arg(&config)
        .arg("--descriptions")
        .arg(dir.path().join("descriptions.vocab"))
        .args(["0", "1"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    // ind2c: 038.9, 428.0, 584.9 and 4 words, so the unknown index is 5
    assert_eq!(json["codes"], serde_json::json!(["038.9", "428.0"]));
    assert_eq!(json["vectors"], serde_json::json!([[5, 0], [3, 2]]));
}
