//! CLI subprocess integration tests.
//!
//! These tests invoke the `kiln` binary as a subprocess and verify exit
//! codes, stdout content, and JSON output. Backends are replaced by mocks so
//! no docker or cluster is needed.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

fn kiln_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_kiln"));
    cmd.env("KILN_MOCK_BACKENDS", "1");
    cmd.env_remove("KILN_LOG");
    cmd
}

const PROJECT: &str = r#"config_version = 1

[engine]
max_build_history = 5

[[manifest]]
name = "web"
[manifest.image]
ref = "registry.local/web"
context = "web"
sync = ["web/src:/app/src"]
[manifest.k8s]
yaml = "k8s/web.yaml"

[[manifest]]
name = "db"
trigger = "manual"
[manifest.compose]
service = "db"
"#;

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("kiln.toml");
    std::fs::write(&path, content).unwrap();
    path
}

fn run_with_stdin(mut cmd: Command, stdin: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

#[test]
fn cli_version_exits_zero() {
    let output = kiln_bin().arg("--version").output().unwrap();
    assert!(output.status.success(), "kiln --version must exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("kiln"), "version output: {stdout}");
}

#[test]
fn cli_help_lists_commands() {
    let output = kiln_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["up", "validate", "doctor"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn validate_lists_manifests() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let output = kiln_bin()
        .args(["validate", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 manifest(s)"), "{stdout}");
    assert!(stdout.contains("web"));
    assert!(stdout.contains("k8s"));
    assert!(stdout.contains("compose"));
}

#[test]
fn validate_json_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let output = kiln_bin()
        .args(["validate", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let manifests = json["manifests"].as_array().unwrap();
    assert_eq!(manifests.len(), 2);
    assert_eq!(manifests[0]["name"], "web");
    assert_eq!(manifests[0]["deploy"], "k8s");
    assert_eq!(manifests[0]["live_update_rules"], 1);
    assert_eq!(manifests[1]["trigger"], "manual");
    assert_eq!(json["update_mode"], "auto");
}

#[test]
fn validate_rejects_bad_config_with_config_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        "config_version = 1\n\n[[manifest]]\nname = \"web\"\n",
    );

    let output = kiln_bin()
        .args(["validate", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config error:"), "{stderr}");
    assert!(stderr.contains("no deploy target"), "{stderr}");
}

#[test]
fn missing_config_exits_with_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let output = kiln_bin()
        .args(["validate", "--config"])
        .arg(dir.path().join("nope.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn up_once_builds_every_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let output = kiln_bin()
        .args(["up", "--once", "--json", "--config"])
        .arg(&config)
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let state: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    for name in ["web", "db"] {
        let ms = &state["manifest_states"][name];
        assert_eq!(ms["has_been_built"], true, "{name} was not built");
        assert!(ms["build_history"][0]["error"].is_null());
    }
    assert_eq!(state["manifest_states"]["web"]["build_history"][0]["backend"], "image");
    assert_eq!(state["manifest_states"]["db"]["build_history"][0]["backend"], "compose");
    assert_eq!(state["completed_build_count"], 2);
    assert!(state["currently_building"].is_null());
}

#[test]
fn up_prints_build_banners() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let output = kiln_bin()
        .args(["up", "--once", "--config"])
        .arg(&config)
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("──┤ Building: web ├"), "{stdout}");
    assert!(stdout.contains("──┤ Building: db ├"), "{stdout}");
    assert!(stdout.contains("ok"), "{stdout}");
}

#[test]
fn up_image_mode_skips_live_update() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let output = kiln_bin()
        .args(["up", "--once", "--json", "--update-mode", "image", "--config"])
        .arg(&config)
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(output.status.success());
    let state: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(state["manifest_states"]["web"]["build_history"][0]["backend"], "image");
}

#[test]
fn up_rejects_unknown_update_mode() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let output = kiln_bin()
        .args(["up", "--update-mode", "fastest", "--config"])
        .arg(&config)
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fastest"), "{stderr}");
}

#[test]
fn up_stops_on_quit() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let mut cmd = kiln_bin();
    cmd.args(["up", "--json", "--config"]).arg(&config);
    let output = run_with_stdin(cmd, "quit\n");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let state: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(state["manifest_states"].is_object());
}

#[test]
fn up_reports_unrecognized_stdin_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let mut cmd = kiln_bin();
    cmd.args(["up", "--json", "--config"]).arg(&config);
    let output = run_with_stdin(cmd, "changed a b c\nquit\n");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized command: changed a b c"), "{stderr}");
}

#[test]
fn doctor_json_reports_checks() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), PROJECT);

    let output = kiln_bin()
        .args(["doctor", "--json", "--config"])
        .arg(&config)
        .output()
        .unwrap();
    // Tool availability depends on the host; only the shape is fixed.
    assert!(matches!(output.status.code(), Some(0 | 1)));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["healthy"].is_boolean());
    let checks = json["checks"].as_array().unwrap();
    let backends = checks.iter().find(|c| c["name"] == "backends").unwrap();
    assert!(backends["message"]
        .as_str()
        .unwrap()
        .contains("live_update → image → compose"));
}
