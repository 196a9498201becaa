use crate::composite::BuildAndDeployer;
use crate::controller::BuildController;
use crate::CoreError;
use kiln_schema::{load_project, ConfigFileSource, Manifest, ManifestSource, ProjectConfig};
use kiln_store::{Action, EngineState, Store, StoreLoop, Subscriber};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The control loop for one project.
///
/// Owns the store and wires the build controller to it. Observers register
/// extra subscribers before [`Engine::run`] and may dispatch actions through
/// [`Engine::store`] at any time.
pub struct Engine {
    project: ProjectConfig,
    bd: Arc<dyn BuildAndDeployer>,
    source: Arc<dyn ManifestSource>,
    cancel: CancellationToken,
    store: Store,
    store_loop: StoreLoop,
    display_root: Option<PathBuf>,
}

impl Engine {
    pub fn new(
        project: ProjectConfig,
        bd: Arc<dyn BuildAndDeployer>,
        source: Arc<dyn ManifestSource>,
        cancel: CancellationToken,
    ) -> Self {
        let state = EngineState::new()
            .with_features(project.features.clone())
            .with_max_build_history(project.engine.max_build_history);
        let (store, store_loop) = Store::new(state, project.engine.action_queue_capacity);
        Self {
            project,
            bd,
            source,
            cancel,
            store,
            store_loop,
            display_root: None,
        }
    }

    /// Engine for the project described by a `kiln.toml`, reloading
    /// manifests from the same file.
    pub fn from_config_file(
        path: &Path,
        bd: Arc<dyn BuildAndDeployer>,
        cancel: CancellationToken,
    ) -> Result<Self, CoreError> {
        let project = load_project(path)?;
        let source = Arc::new(ConfigFileSource::new(path));
        let mut engine = Self::new(project, bd, source, cancel);
        if let Some(dir) = path.parent() {
            engine = engine.with_display_root(dir);
        }
        Ok(engine)
    }

    #[must_use]
    pub fn with_display_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.display_root = Some(root.into());
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn manifests(&self) -> &[Manifest] {
        &self.project.manifests
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn add_subscriber(&mut self, subscriber: Box<dyn Subscriber>) {
        self.store_loop.add_subscriber(subscriber);
    }

    /// Add every manifest and run until cancelled.
    ///
    /// Returns the final state, or the error that stopped the store loop.
    pub async fn run(self) -> Result<EngineState, CoreError> {
        let Engine {
            project,
            bd,
            source,
            cancel,
            store,
            mut store_loop,
            display_root,
        } = self;

        let mut controller = BuildController::new(bd, source, cancel.clone());
        if let Some(root) = display_root {
            controller = controller.with_display_root(root);
        }
        store_loop.add_subscriber(Box::new(controller));

        info!("starting engine with {} manifest(s)", project.manifests.len());
        let handle = tokio::spawn(store_loop.run(cancel.clone()));
        for manifest in project.manifests {
            if let Err(e) = store.dispatch(Action::ManifestAdded { manifest }).await {
                debug!("store closed while adding manifests: {e}");
                break;
            }
        }

        let outcome = handle.await;
        // Stop any build still running.
        cancel.cancel();
        match outcome {
            Ok(result) => result?,
            Err(e) => return Err(CoreError::Task(e.to_string())),
        }
        info!("engine stopped");
        Ok(store.snapshot())
    }
}
