use crate::RuntimeError;
use async_trait::async_trait;
use kiln_schema::Manifest;
use kiln_store::{BuildResult, BuildState};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The strategies a build can be served by, cheapest first.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Copy changed files into a running container and restart it.
    LiveUpdate,
    /// Build an image and apply cluster objects.
    ImageBuild,
    /// Build and (re)start a compose service.
    ComposeBuild,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::LiveUpdate => "live_update",
            BackendKind::ImageBuild => "image",
            BackendKind::ComposeBuild => "compose",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live_update" => Ok(BackendKind::LiveUpdate),
            "image" => Ok(BackendKind::ImageBuild),
            "compose" => Ok(BackendKind::ComposeBuild),
            other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
        }
    }
}

/// Per-build handle shared by the backend and everything it runs.
#[derive(Debug, Clone)]
pub struct BuildContext {
    cancel: CancellationToken,
    log: Option<mpsc::UnboundedSender<String>>,
}

impl BuildContext {
    pub fn new(cancel: CancellationToken, log: mpsc::UnboundedSender<String>) -> Self {
        Self {
            cancel,
            log: Some(log),
        }
    }

    /// Context whose output is only traced, never routed to the state.
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { cancel, log: None }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append a line to this build's log.
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!("{line}");
        if let Some(tx) = &self.log {
            // The receiver only goes away once the build has been reported.
            let _ = tx.send(line);
        }
    }
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Whether this backend applies to the manifest in its current state.
    ///
    /// Must be cheap and free of side effects.
    fn can_handle(&self, manifest: &Manifest, state: &BuildState) -> bool;

    /// Build and deploy. [`RuntimeError::Redirect`] hands the build to the
    /// next backend; any other error is final for this attempt.
    async fn execute(
        &self,
        ctx: &BuildContext,
        manifest: &Manifest,
        state: &BuildState,
    ) -> Result<BuildResult, RuntimeError>;
}

/// The command-driven backend for `kind`.
pub fn select_backend(kind: BackendKind) -> Arc<dyn BuildBackend> {
    match kind {
        BackendKind::LiveUpdate => Arc::new(crate::live_update::LiveUpdateBackend::new()),
        BackendKind::ImageBuild => Arc::new(crate::image::ImageBuildBackend::new()),
        BackendKind::ComposeBuild => Arc::new(crate::compose::ComposeBuildBackend::new()),
    }
}
