//! Build scheduling and execution for kiln.
//!
//! This crate ties the store, manifest definitions, and build backends into
//! the `Engine`: the `BuildController` subscriber that starts at most one
//! build at a time for the head of the queue, the `CompositeBuildAndDeployer`
//! that tries backends in a fixed priority order, and signal handling that
//! turns Ctrl-C into cancellation.

pub mod composite;
pub mod concurrency;
pub mod controller;
pub mod engine;

pub use composite::{
    default_build_order, BuildAndDeployer, BuildOrder, BuildOutcome, CompositeBuildAndDeployer,
};
pub use concurrency::{install_signal_handler, shutdown_requested};
pub use controller::{banner, BuildController, BuildEntry, MAX_CHANGED_FILES_TO_PRINT};
pub use engine::Engine;

use kiln_runtime::{BackendKind, RuntimeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] kiln_schema::ManifestError),
    #[error("store error: {0}")]
    Store(#[from] kiln_store::StoreError),
    #[error("{backend} backend failed: {source}")]
    Backend {
        backend: BackendKind,
        #[source]
        source: RuntimeError,
    },
    #[error("no backend can build manifest '{0}'")]
    NoApplicableBackend(String),
    #[error("build cancelled")]
    Cancelled,
    #[error("engine task failed: {0}")]
    Task(String),
}

impl CoreError {
    /// Backend that produced the error, if one did.
    pub fn backend(&self) -> Option<BackendKind> {
        match self {
            CoreError::Backend { backend, .. } => Some(*backend),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_name_their_backend() {
        let err = CoreError::Backend {
            backend: BackendKind::ImageBuild,
            source: RuntimeError::ExecFailed("exit 1".to_owned()),
        };
        assert_eq!(err.backend(), Some(BackendKind::ImageBuild));
        assert_eq!(err.to_string(), "image backend failed: runtime execution failed: exit 1");
        assert_eq!(CoreError::Cancelled.backend(), None);
    }
}
