//! Build backends and environment probing for kiln.
//!
//! This crate implements the execution layer: the pluggable `BuildBackend`
//! trait and its `BackendKind` tags, the `BuildContext` handed to every build
//! (cancellation plus a log sink), command-driven live-update, image, and
//! compose backends, detection of the surrounding cluster and container
//! runtime, prerequisite checking, and a scriptable `MockBackend`.

pub mod backend;
pub mod command;
pub mod compose;
pub mod env;
pub mod image;
pub mod live_update;
pub mod mock;
pub mod prereq;

pub use backend::{select_backend, BackendKind, BuildBackend, BuildContext};
pub use compose::ComposeBuildBackend;
pub use env::{ClusterEnv, ContainerRuntime, EnvCapabilities};
pub use image::ImageBuildBackend;
pub use live_update::LiveUpdateBackend;
pub use mock::{MockBackend, MockCall, MockOutcome};
pub use prereq::{check_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    /// The backend cannot serve this build; the next one in order should try.
    #[error("not viable here: {0}")]
    Redirect(String),
    #[error("build cancelled")]
    Cancelled,
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}

impl RuntimeError {
    pub fn is_redirect(&self) -> bool {
        matches!(self, RuntimeError::Redirect(_))
    }
}
