pub mod doctor;
pub mod up;
pub mod validate;

use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::{default_build_order, BuildOrder};
use kiln_runtime::{select_backend, BackendKind, BuildBackend, EnvCapabilities, MockBackend};
use kiln_schema::{load_project, ProjectConfig, UpdateMode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Replace every backend with a scripted mock and skip environment probing.
const MOCK_ENV: &str = "KILN_MOCK_BACKENDS";
const SKIP_PREREQS_ENV: &str = "KILN_SKIP_PREREQS";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn load_config(path: &Path) -> Result<ProjectConfig, String> {
    load_project(path).map_err(|e| format!("config error: {e}"))
}

pub fn mock_backends() -> bool {
    std::env::var(MOCK_ENV).as_deref() == Ok("1")
}

pub fn skip_prereqs() -> bool {
    mock_backends() || std::env::var(SKIP_PREREQS_ENV).as_deref() == Ok("1")
}

pub async fn detect_capabilities() -> EnvCapabilities {
    if mock_backends() {
        EnvCapabilities::local_docker()
    } else {
        EnvCapabilities::detect().await
    }
}

pub fn build_order(caps: &EnvCapabilities, update_mode: UpdateMode) -> BuildOrder {
    let backend = |kind: BackendKind| -> Arc<dyn BuildBackend> {
        if mock_backends() {
            Arc::new(MockBackend::new(kind))
        } else {
            select_backend(kind)
        }
    };
    default_build_order(
        backend(BackendKind::LiveUpdate),
        backend(BackendKind::ImageBuild),
        backend(BackendKind::ComposeBuild),
        caps,
        update_mode,
    )
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_done(pb: &ProgressBar, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "ok" => Style::new().green().apply_to(status).to_string(),
        "building" => Style::new().cyan().bold().apply_to(status).to_string(),
        "pending" => Style::new().yellow().apply_to(status).to_string(),
        "error" | "config error" => Style::new().red().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

pub fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_status_keeps_text() {
        for status in ["ok", "building", "pending", "error", "config error"] {
            assert!(colorize_status(status).contains(status));
        }
        assert_eq!(colorize_status("unknown"), "unknown");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_CONFIG_ERROR);
    }

    #[test]
    fn missing_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("kiln.toml")).unwrap_err();
        assert!(err.starts_with("config error:"), "{err}");
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("probing...");
        spin_done(&pb, "done");
    }
}
