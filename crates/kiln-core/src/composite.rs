//! Ordered fallback across build backends.

use crate::CoreError;
use async_trait::async_trait;
use kiln_runtime::{BackendKind, BuildBackend, BuildContext, ContainerRuntime, EnvCapabilities, RuntimeError};
use kiln_schema::{Manifest, UpdateMode};
use kiln_store::{BuildResult, BuildState};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// A finished build and the backend that served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub result: BuildResult,
    pub backend: BackendKind,
}

/// Executes one build for the controller.
#[async_trait]
pub trait BuildAndDeployer: Send + Sync {
    async fn build_and_deploy(
        &self,
        ctx: &BuildContext,
        manifest: &Manifest,
        state: &BuildState,
    ) -> Result<BuildOutcome, CoreError>;
}

/// Backends in priority order, cheapest first.
#[derive(Clone, Default)]
pub struct BuildOrder {
    backends: Vec<Arc<dyn BuildBackend>>,
}

impl BuildOrder {
    pub fn new(backends: Vec<Arc<dyn BuildBackend>>) -> Self {
        Self { backends }
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BuildBackend>> {
        self.backends.iter()
    }
}

impl fmt::Debug for BuildOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

/// The order used for this environment: live update, then image, then
/// compose, minus whatever the environment or update mode rules out.
pub fn default_build_order(
    live_update: Arc<dyn BuildBackend>,
    image: Arc<dyn BuildBackend>,
    compose: Arc<dyn BuildBackend>,
    caps: &EnvCapabilities,
    update_mode: UpdateMode,
) -> BuildOrder {
    let mut backends = Vec::with_capacity(3);

    let live_viable = caps.has_cluster()
        && update_mode != UpdateMode::Image
        && caps.runtime == ContainerRuntime::Docker
        && (caps.cluster.is_local() || update_mode == UpdateMode::Container);
    if live_viable {
        backends.push(live_update);
    }
    if caps.has_cluster() {
        backends.push(image);
    }
    if caps.compose_available {
        backends.push(compose);
    }

    let order = BuildOrder::new(backends);
    info!(
        "build order for cluster={} update_mode={update_mode}: {order:?}",
        caps.cluster
    );
    order
}

/// Tries each applicable backend in order until one produces a result.
///
/// Only [`RuntimeError::Redirect`] moves on to the next backend. Any other
/// error ends the attempt.
pub struct CompositeBuildAndDeployer {
    order: BuildOrder,
}

impl CompositeBuildAndDeployer {
    pub fn new(order: BuildOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &BuildOrder {
        &self.order
    }

    /// Backends that would be offered this build, in the order they'd be tried.
    pub fn candidates(&self, manifest: &Manifest, state: &BuildState) -> Vec<BackendKind> {
        self.order
            .iter()
            .filter(|b| b.can_handle(manifest, state))
            .map(|b| b.kind())
            .collect()
    }
}

#[async_trait]
impl BuildAndDeployer for CompositeBuildAndDeployer {
    async fn build_and_deploy(
        &self,
        ctx: &BuildContext,
        manifest: &Manifest,
        state: &BuildState,
    ) -> Result<BuildOutcome, CoreError> {
        for backend in self.order.iter() {
            if ctx.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let kind = backend.kind();
            if !backend.can_handle(manifest, state) {
                trace!("{kind} skips '{}'", manifest.name);
                continue;
            }

            debug!("building '{}' with {}", manifest.name, backend.name());
            match backend.execute(ctx, manifest, state).await {
                Ok(result) => return Ok(BuildOutcome { result, backend: kind }),
                Err(RuntimeError::Redirect(reason)) => {
                    ctx.log(format!("{kind} not viable ({reason}), falling back"));
                }
                Err(RuntimeError::Cancelled) => return Err(CoreError::Cancelled),
                Err(source) => return Err(CoreError::Backend { backend: kind, source }),
            }
        }
        Err(CoreError::NoApplicableBackend(manifest.name.to_string()))
    }
}
