use crate::build::BuildResult;
use chrono::{DateTime, Utc};
use kiln_schema::{Manifest, ManifestName};
use std::path::PathBuf;

/// An immutable event describing something that happened.
///
/// Actions are the only way to mutate [`EngineState`](crate::EngineState).
/// Errors produced outside the reduction loop travel as plain strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A watched file was created, modified, or removed.
    FileChanged {
        path: PathBuf,
        detected_at: DateTime<Utc>,
    },
    /// A manifest appeared in the configuration.
    ManifestAdded { manifest: Manifest },
    /// A manifest disappeared from the configuration.
    ManifestRemoved { name: ManifestName },
    /// A user asked for a build of this manifest now.
    ManualTrigger { name: ManifestName },
    /// The definitions of these manifests may be stale.
    ConfigChanged { manifests: Vec<ManifestName> },
    /// The build controller started building a manifest.
    BuildStarted {
        manifest: ManifestName,
        start_time: DateTime<Utc>,
        files_changed: Vec<PathBuf>,
        first_build: bool,
    },
    /// A build attempt finished, successfully or not.
    BuildCompleted {
        manifest: ManifestName,
        finish_time: DateTime<Utc>,
        backend: Option<String>,
        result: Result<BuildResult, String>,
    },
    /// A manifest's definition was re-read from its config source.
    ManifestReloaded {
        old: Manifest,
        new: Result<Manifest, String>,
    },
    /// A line of build or system output.
    LogAppended {
        manifest: Option<ManifestName>,
        line: String,
    },
}

impl Action {
    /// Short variant name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::FileChanged { .. } => "file_changed",
            Action::ManifestAdded { .. } => "manifest_added",
            Action::ManifestRemoved { .. } => "manifest_removed",
            Action::ManualTrigger { .. } => "manual_trigger",
            Action::ConfigChanged { .. } => "config_changed",
            Action::BuildStarted { .. } => "build_started",
            Action::BuildCompleted { .. } => "build_completed",
            Action::ManifestReloaded { .. } => "manifest_reloaded",
            Action::LogAppended { .. } => "log_appended",
        }
    }

    /// Whether this action ends a task spawned by the build controller.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Action::BuildCompleted { .. } | Action::ManifestReloaded { .. }
        )
    }

    pub fn file_changed(path: impl Into<PathBuf>) -> Self {
        Action::FileChanged {
            path: path.into(),
            detected_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_actions() {
        let completed = Action::BuildCompleted {
            manifest: ManifestName::from("api"),
            finish_time: Utc::now(),
            backend: None,
            result: Err("boom".to_owned()),
        };
        assert!(completed.is_terminal());
        assert!(!Action::file_changed("a.txt").is_terminal());
        assert!(!Action::ManualTrigger {
            name: ManifestName::from("api")
        }
        .is_terminal());
    }

    #[test]
    fn kind_names_variants() {
        assert_eq!(Action::file_changed("a.txt").kind(), "file_changed");
        assert_eq!(
            Action::LogAppended {
                manifest: None,
                line: String::new()
            }
            .kind(),
            "log_appended"
        );
    }
}
