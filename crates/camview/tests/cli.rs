use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn camview(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_camview"))
        .env("CAMVIEW_CONFIG_DIR", config_dir)
        .env_remove("CAMVIEW_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run camview")
}

fn summary(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "camview failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("summary is JSON")
}

#[test]
fn negotiate_picks_smallest_covering_size() {
    let root = TempDir::new().unwrap();
    let output = camview(
        root.path(),
        &["negotiate", "1280x720", "--sizes", "640x480,1920x1080,3840x2160"],
    );
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "1920x1080");
}

#[test]
fn negotiate_falls_back_to_default_size() {
    let root = TempDir::new().unwrap();
    let output = camview(
        root.path(),
        &["negotiate", "4000x3000", "--sizes", "1280x720", "--json"],
    );
    let value: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["selected"], "640x480");
    assert_eq!(value["requested"], "4000x3000");
}

#[test]
fn run_uses_config_from_config_dir() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("camview.toml"),
        r#"
version = 1

[capture]
width = 1280
height = 720
camera = "front"
"#,
    )
    .unwrap();

    let output = camview(
        root.path(),
        &["run", "--frames", "5", "--frame-interval-ms", "0", "--json"],
    );
    let value = summary(&output);
    assert_eq!(value["opens"], serde_json::json!(["front"]));
    assert_eq!(value["capture_size"], "1280x720");
    assert_eq!(value["frames_drawn"], 5);
    assert_eq!(value["leaked_resources"], 0);
}

#[test]
fn run_flags_override_config_file() {
    let root = TempDir::new().unwrap();
    let config = root.path().join("preview.toml");
    fs::write(&config, "version = 1\n[capture]\nwidth = 1280\nheight = 720\n").unwrap();

    let output = camview(
        root.path(),
        &[
            "run",
            "--config",
            config.to_str().unwrap(),
            "--size",
            "1920x1080",
            "--frames",
            "2",
            "--frame-interval-ms",
            "0",
            "--json",
        ],
    );
    let value = summary(&output);
    assert_eq!(value["capture_size"], "1920x1080");
    assert_eq!(value["opens"], serde_json::json!(["back"]));
}

#[test]
fn run_switches_camera_mid_preview() {
    let root = TempDir::new().unwrap();
    let output = camview(
        root.path(),
        &[
            "run",
            "--frames",
            "4",
            "--switch-after",
            "2",
            "--frame-interval-ms",
            "0",
            "--json",
        ],
    );
    let value = summary(&output);
    assert_eq!(value["opens"], serde_json::json!(["back", "front"]));
    assert_eq!(value["frames_drawn"], 4);
    assert_eq!(value["leaked_resources"], 0);
}

#[test]
fn run_reports_permission_refusal() {
    let root = TempDir::new().unwrap();
    let output = camview(
        root.path(),
        &[
            "run",
            "--frames",
            "2",
            "--frame-interval-ms",
            "0",
            "--deny-permission",
            "--json",
        ],
    );
    let value = summary(&output);
    assert_eq!(value["frames_drawn"], 0);
    assert!(!value["failures"].as_array().unwrap().is_empty());
}

#[test]
fn run_rejects_invalid_config() {
    let root = TempDir::new().unwrap();
    fs::write(root.path().join("camview.toml"), "version = 1\n[render]\ngl_version = 4\n")
        .unwrap();

    let output = camview(root.path(), &["run", "--frames", "1"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("gl_version"), "stderr: {stderr}");
}

#[test]
fn where_prints_config_file() {
    let root = TempDir::new().unwrap();
    let output = camview(root.path(), &["where"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("camview.toml"));
}
