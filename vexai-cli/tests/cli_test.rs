//! Runs the built binary and checks which stream each kind of output uses

use std::process::Command;

fn vexai() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_vexai"));
    cmd.env_remove("RUST_LOG").env_remove("VEXAI_LOG_LEVEL");
    cmd
}

#[test]
fn test_logs_stay_off_stdout() {
    let recording = tempfile::tempdir().unwrap();
    let models = tempfile::tempdir().unwrap();

    // no model in the directory, so startup fails after logging warnings
    let output = vexai()
        .args(["--log-level", "info", "run", "--replay"])
        .arg(recording.path())
        .env("VEXAI_MODEL_DIR", models.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(output.stdout.is_empty(), "stdout: {}", String::from_utf8_lossy(&output.stdout));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No pose source"), "stderr: {}", stderr);
}

#[test]
fn test_probe_report_is_plain_json() {
    let models = tempfile::tempdir().unwrap();

    let output = vexai()
        .args(["--log-level", "debug", "probe"])
        .env("VEXAI_MODEL_DIR", models.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = report.as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|entry| entry["available"] == false));
}
