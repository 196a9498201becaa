//! Decides what to build next and runs it off the store loop.

use crate::composite::BuildAndDeployer;
use chrono::Utc;
use kiln_runtime::BuildContext;
use kiln_schema::{Manifest, ManifestName, ManifestSource};
use kiln_store::{panic_message, Action, BuildState, EngineState, Store, Subscriber};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest list of changed files spelled out in a rebuild banner.
pub const MAX_CHANGED_FILES_TO_PRINT: usize = 3;

/// Everything a build task needs, captured under one read of the state.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildEntry {
    pub manifest: Manifest,
    pub build_state: BuildState,
    pub files_changed: Vec<PathBuf>,
    pub first_build: bool,
    pub needs_config_reload: bool,
}

/// Subscriber that starts at most one build (or config reload) at a time,
/// always for the head of the build queue.
pub struct BuildController {
    bd: Arc<dyn BuildAndDeployer>,
    source: Arc<dyn ManifestSource>,
    cancel: CancellationToken,
    /// Action count seen at the last decision; `None` before the first one.
    last_action_count: Option<u64>,
    /// Completed-task count when the task in flight was started.
    in_flight: Option<u64>,
    display_root: Option<PathBuf>,
}

impl BuildController {
    pub fn new(
        bd: Arc<dyn BuildAndDeployer>,
        source: Arc<dyn ManifestSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bd,
            source,
            cancel,
            last_action_count: None,
            in_flight: None,
            display_root: None,
        }
    }

    /// Show changed files relative to `root` in rebuild banners.
    #[must_use]
    pub fn with_display_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.display_root = Some(root.into());
        self
    }

    /// Decide whether a task should start now, and for what.
    ///
    /// Returns `None` when the queue is empty, when nothing relevant changed
    /// since the last decision, or while the previous task is unfinished.
    pub fn needs_build(&mut self, state: &EngineState) -> Option<BuildEntry> {
        let head = state.manifests_to_build.front()?;
        if self.last_action_count == Some(state.build_controller_action_count) {
            return None;
        }
        if let Some(started_at) = self.in_flight {
            if state.completed_build_count <= started_at {
                return None;
            }
            self.in_flight = None;
        }
        if state.currently_building.is_some() {
            return None;
        }

        let ms = state.manifest_state(head)?;
        self.last_action_count = Some(state.build_controller_action_count);
        self.in_flight = Some(state.completed_build_count);

        let build_state = ms.next_build_state();
        Some(BuildEntry {
            manifest: ms.manifest.clone(),
            files_changed: build_state.files_changed().to_vec(),
            first_build: build_state.is_first_build(),
            build_state,
            needs_config_reload: ms.config_is_dirty,
        })
    }

    fn spawn(&self, store: Store, entry: BuildEntry) {
        let task = BuildTask {
            store: store.clone(),
            bd: self.bd.clone(),
            source: self.source.clone(),
            cancel: self.cancel.child_token(),
            display_root: self.display_root.clone(),
            started: Arc::new(AtomicBool::new(false)),
        };
        let started = task.started.clone();
        let manifest = entry.manifest.clone();
        let reload = entry.needs_config_reload;

        tokio::spawn(async move {
            let Err(e) = tokio::spawn(task.run(entry)).await else {
                return;
            };
            let msg = if e.is_panic() {
                format!("build task panicked: {}", panic_message(e.into_panic().as_ref()))
            } else {
                "build task was aborted".to_owned()
            };
            error!("'{}': {msg}", manifest.name);

            // Report the failure so the queue keeps moving.
            if reload {
                dispatch(&store, Action::ManifestReloaded { old: manifest, new: Err(msg) }).await;
                return;
            }
            if !started.load(Ordering::SeqCst) {
                dispatch(&store, build_started(&manifest.name, Vec::new(), false)).await;
            }
            dispatch(
                &store,
                Action::BuildCompleted {
                    manifest: manifest.name,
                    finish_time: Utc::now(),
                    backend: None,
                    result: Err(msg),
                },
            )
            .await;
        });
    }
}

impl Subscriber for BuildController {
    fn name(&self) -> &str {
        "build-controller"
    }

    fn on_change(&mut self, store: &Store) {
        let entry = {
            let state = store.read_state();
            self.needs_build(&state)
        };
        if let Some(entry) = entry {
            debug!(
                "scheduling '{}' (reload={}, files={})",
                entry.manifest.name,
                entry.needs_config_reload,
                entry.files_changed.len()
            );
            self.spawn(store.clone(), entry);
        }
    }
}

struct BuildTask {
    store: Store,
    bd: Arc<dyn BuildAndDeployer>,
    source: Arc<dyn ManifestSource>,
    cancel: CancellationToken,
    display_root: Option<PathBuf>,
    started: Arc<AtomicBool>,
}

impl BuildTask {
    async fn run(self, entry: BuildEntry) {
        if entry.needs_config_reload {
            self.reload(entry.manifest).await;
            return;
        }

        let name = entry.manifest.name.clone();
        dispatch(
            &self.store,
            build_started(&name, entry.files_changed.clone(), entry.first_build),
        )
        .await;
        self.started.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_logs(self.store.clone(), name.clone(), rx));
        let ctx = BuildContext::new(self.cancel.clone(), tx);
        for line in banner(&entry, self.display_root.as_deref()) {
            ctx.log(line);
        }

        let outcome = self
            .bd
            .build_and_deploy(&ctx, &entry.manifest, &entry.build_state)
            .await;
        let (backend, result) = match outcome {
            Ok(outcome) => {
                info!("built '{name}' with {}", outcome.backend);
                (Some(outcome.backend.to_string()), Ok(outcome.result))
            }
            Err(e) => {
                warn!("build of '{name}' failed: {e}");
                ctx.log(format!("ERROR: {e}"));
                (e.backend().map(|b| b.to_string()), Err(e.to_string()))
            }
        };

        // Every log line must be reduced before the completion.
        drop(ctx);
        if let Err(e) = forwarder.await {
            warn!("log forwarder for '{name}' failed: {e}");
        }

        dispatch(
            &self.store,
            Action::BuildCompleted {
                manifest: name,
                finish_time: Utc::now(),
                backend,
                result,
            },
        )
        .await;
    }

    async fn reload(&self, old: Manifest) {
        let source = self.source.clone();
        let name = old.name.clone();
        info!("reloading definition of '{name}'");
        let new = match tokio::task::spawn_blocking(move || source.reload(&name)).await {
            Ok(Ok(manifest)) => Ok(manifest),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("reload task failed: {e}")),
        };
        dispatch(&self.store, Action::ManifestReloaded { old, new }).await;
    }
}

fn build_started(name: &ManifestName, files_changed: Vec<PathBuf>, first_build: bool) -> Action {
    Action::BuildStarted {
        manifest: name.clone(),
        start_time: Utc::now(),
        files_changed,
        first_build,
    }
}

async fn dispatch(store: &Store, action: Action) {
    let kind = action.kind();
    if let Err(e) = store.dispatch(action).await {
        // Only happens once the store loop has shut down.
        debug!("dropping {kind}: {e}");
    }
}

async fn forward_logs(store: Store, name: ManifestName, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        dispatch(
            &store,
            Action::LogAppended {
                manifest: Some(name.clone()),
                line,
            },
        )
        .await;
    }
}

fn display_path(path: &Path, root: Option<&Path>) -> String {
    root.and_then(|r| path.strip_prefix(r).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Log lines announcing a build.
pub fn banner(entry: &BuildEntry, display_root: Option<&Path>) -> Vec<String> {
    let name = &entry.manifest.name;
    if entry.first_build {
        return vec![format!("──┤ Building: {name} ├{}", "─".repeat(46))];
    }

    let changed = entry.build_state.files_changed();
    let mut shown: Vec<String> = changed
        .iter()
        .take(MAX_CHANGED_FILES_TO_PRINT)
        .map(|f| display_path(f, display_root))
        .collect();
    if changed.len() > MAX_CHANGED_FILES_TO_PRINT {
        shown.push("...".to_owned());
    }
    vec![
        String::new(),
        format!("{} changed: [{}]", changed.len(), shown.join(" ")),
        format!("──┤ Rebuilding: {name} ├{}", "─".repeat(44)),
    ]
}
