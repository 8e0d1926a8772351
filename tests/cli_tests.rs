//! CLI integration tests for flowsr
//!
//! Runs the flowsr binary on small JSON datasets and checks what it writes.

use flowsr_lib::storage::{ArrayStore, JsonStore, StoredArray};
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

#[path = "common/mod.rs"]
mod common;

use common::*;

// ============================================================================
// Helper Functions
// ============================================================================

/// Run flowsr command and return output
fn run_flowsr(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Get stdout as string
fn stdout_string(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Get stderr as string
fn stderr_string(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn path_str(path: &Path) -> &str {
    path.to_str().expect("temp paths are UTF-8")
}

/// Write a pulsatile flow dataset with a double-precision lumen mask
fn create_test_flow(dir: &TempDir, name: &str, shape: (usize, usize, usize, usize)) -> PathBuf {
    let path = dir.path().join(name);
    let store = JsonStore::new();
    store_flow(&store, &path, &pulsatile_velocity(shape, 1.2), &magnitudes(shape), 1.5);

    let mask = lumen_mask((shape.1, shape.2, shape.3)).mapv(f64::from).into_dyn();
    store
        .save(&path, "mask", StoredArray::F64(mask), None)
        .expect("Failed to save mask");
    path
}

fn stored_keys(path: &Path) -> Vec<String> {
    JsonStore::new().keys(path).expect("Failed to read keys")
}

fn stored_shape(path: &Path, key: &str) -> Vec<usize> {
    JsonStore::new().shape(path, key).expect("Failed to read shape")
}

// ============================================================================
// Version and Help Tests
// ============================================================================

#[test]
fn test_cli_help() {
    let output = run_flowsr(&["--help"]);

    assert!(output.status.success(), "Help command should succeed");

    let stdout = stdout_string(&output);
    for command in ["downsample", "smooth", "predict", "evaluate", "delete"] {
        assert!(stdout.contains(command), "Help should mention {}", command);
    }
}

// ============================================================================
// Resampling Tests
// ============================================================================

#[test]
fn test_cli_downsample_with_merge() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = create_test_flow(&dir, "flow.json", (6, 2, 2, 2));
    let output = dir.path().join("flow_ds.json");

    let result = run_flowsr(&[
        "downsample",
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-f",
        "2",
        "--offset",
        "1",
        "--merge",
    ]);
    assert!(result.status.success(), "Downsample failed: {}", stderr_string(&result));

    for key in ["u", "v", "w"] {
        assert_eq!(stored_shape(&output, key), vec![3, 2, 2, 2]);
    }
    let mask = JsonStore::new().load(&output, "mask").expect("mask merged");
    assert!(!mask.is_f64(), "Merged keys should be single precision");
    assert_eq!(mask.shape(), &[2, 2, 2]);
}

#[test]
fn test_cli_refuses_existing_output() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = create_test_flow(&dir, "flow.json", (6, 2, 2, 2));
    let output = dir.path().join("flow_ds.json");
    let args = [
        "downsample",
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "-f",
        "2",
    ];

    assert!(run_flowsr(&args).status.success());
    let before = std::fs::read(&output).expect("Failed to read output");

    let second = run_flowsr(&args);
    assert!(!second.status.success(), "Second run should fail");
    assert!(
        stderr_string(&second).contains("Output already exists"),
        "Unexpected error: {}",
        stderr_string(&second)
    );
    let after = std::fs::read(&output).expect("Failed to read output");
    assert_eq!(before, after, "Existing output must stay untouched");
}

#[test]
fn test_cli_smooth_interleaved() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = create_test_flow(&dir, "flow.json", (6, 2, 2, 2));
    let output = dir.path().join("flow_smooth.json");

    let result = run_flowsr(&[
        "smooth",
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "--interleave",
        "2",
    ]);
    assert!(result.status.success(), "Smooth failed: {}", stderr_string(&result));
    assert_eq!(stored_shape(&output, "w"), vec![6, 2, 2, 2]);
    assert!(!stored_keys(&output).contains(&"mask".to_string()));

    let rejected = run_flowsr(&[
        "smooth",
        "-i",
        path_str(&input),
        "-o",
        path_str(&dir.path().join("zero_stride.json")),
        "--interleave",
        "0",
    ]);
    assert!(!rejected.status.success(), "Zero stride should be rejected");
}

// ============================================================================
// File Management Tests
// ============================================================================

#[test]
fn test_cli_info_json() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = create_test_flow(&dir, "flow.json", (4, 2, 2, 2));

    let output = run_flowsr(&["info", path_str(&input), "--json"]);
    assert!(output.status.success(), "Info failed: {}", stderr_string(&output));

    let entries: serde_json::Value = serde_json::from_str(&stdout_string(&output)).expect("valid JSON");
    let keys: Vec<&str> = entries
        .as_array()
        .expect("array of entries")
        .iter()
        .filter_map(|entry| entry["key"].as_str())
        .collect();
    assert!(keys.contains(&"u") && keys.contains(&"mask") && keys.contains(&"venc"));
}

#[test]
fn test_cli_delete_key() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = create_test_flow(&dir, "flow.json", (4, 2, 2, 2));

    let output = run_flowsr(&["delete", path_str(&input), "mask", "not_there"]);
    assert!(output.status.success(), "Delete failed: {}", stderr_string(&output));

    let stdout = stdout_string(&output);
    assert!(stdout.contains("Key 'not_there' not present"));
    assert!(stdout.contains("Removed 1 keys"));
    let keys = stored_keys(&input);
    assert!(!keys.contains(&"mask".to_string()));
    assert!(keys.contains(&"u".to_string()));
}

#[test]
fn test_cli_merge_copies_missing_keys() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let source = create_test_flow(&dir, "flow.json", (4, 2, 2, 2));
    let target = dir.path().join("extra.json");
    let marker = ArrayD::from_shape_vec(IxDyn(&[1]), vec![7.0f32]).expect("scalar shape");
    JsonStore::new()
        .save(&target, "mask", StoredArray::F32(marker.clone()), None)
        .expect("Failed to save marker");

    let output = run_flowsr(&["merge", "-t", path_str(&target), "-s", path_str(&source)]);
    assert!(output.status.success(), "Merge failed: {}", stderr_string(&output));

    let store = JsonStore::new();
    assert_eq!(store.shape(&target, "u").expect("u merged"), vec![4, 2, 2, 2]);
    assert_eq!(store.load(&target, "mask").expect("mask kept"), StoredArray::F32(marker));
}

// ============================================================================
// Reconstruction and Evaluation Tests
// ============================================================================

#[test]
fn test_cli_predict_writes_combined_series() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = create_test_flow(&dir, "flow.json", (8, 6, 7, 6));
    let output = dir.path().join("flow_sr.json");

    let result = run_flowsr(&[
        "predict",
        "-i",
        path_str(&input),
        "-o",
        path_str(&output),
        "--patch-size",
        "4",
        "--overlap",
        "1",
        "--res-increase",
        "2",
        "--batch-size",
        "8",
    ]);
    assert!(result.status.success(), "Predict failed: {}", stderr_string(&result));

    for key in ["u_combined", "v_combined", "w_combined"] {
        assert_eq!(stored_shape(&output, key), vec![16, 6, 7, 6]);
    }
}

#[test]
fn test_cli_evaluate_json_against_itself() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let input = create_test_flow(&dir, "flow.json", (6, 2, 2, 2));

    let output = run_flowsr(&["evaluate", "-p", path_str(&input), "-g", path_str(&input), "--json"]);
    assert!(output.status.success(), "Evaluate failed: {}", stderr_string(&output));

    let report: serde_json::Value = serde_json::from_str(&stdout_string(&output)).expect("valid JSON");
    let errors = report["relative_error"].as_array().expect("per-frame errors");
    assert_eq!(errors.len(), 6);
    assert!(errors.iter().all(|e| e.as_f64() == Some(0.0)));
    assert!(report["rmse"]["v"]
        .as_array()
        .expect("per-frame rmse")
        .iter()
        .all(|e| e.as_f64() == Some(0.0)));

    // u is zero everywhere in the first frame, so no slope is defined there
    let fits = report["k_r2"]["u"].as_array().expect("per-frame fits");
    assert!(fits[0].is_null());
    let k = fits[1]["k"].as_f64().expect("slope");
    let r2 = fits[1]["r2"].as_f64().expect("r2");
    assert!((k - 1.0).abs() < 1e-9 && (r2 - 1.0).abs() < 1e-9);
}
