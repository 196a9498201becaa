//! The pure reducer: the only code that mutates [`EngineState`].

use crate::action::Action;
use crate::state::{BuildReason, BuildRecord, EngineState, ManifestState};
use crate::StoreError;
use chrono::{DateTime, Utc};
use kiln_schema::{Manifest, ManifestName, TriggerMode};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Apply one action to the state.
///
/// Performs no I/O; every timestamp comes from the action itself. An error
/// means a state invariant would be broken and the state can no longer be
/// trusted.
pub fn reduce(state: &mut EngineState, action: &Action) -> Result<(), StoreError> {
    match action {
        Action::FileChanged { path, detected_at } => {
            handle_file_changed(state, path, *detected_at);
        }
        Action::ManifestAdded { manifest } => handle_manifest_added(state, manifest),
        Action::ManifestRemoved { name } => handle_manifest_removed(state, name),
        Action::ManualTrigger { name } => {
            if state.manifest_states.contains_key(name) {
                enqueue_build(state, name, BuildReason::Manual);
            } else {
                warn!("ignoring trigger for unknown manifest '{name}'");
            }
        }
        Action::ConfigChanged { manifests } => {
            for name in manifests {
                let Some(ms) = state.manifest_states.get_mut(name) else {
                    continue;
                };
                ms.config_is_dirty = true;
                enqueue_build(state, name, BuildReason::ConfigReload);
            }
        }
        Action::BuildStarted {
            manifest,
            start_time,
            files_changed,
            first_build,
        } => handle_build_started(state, manifest, *start_time, files_changed, *first_build)?,
        Action::BuildCompleted {
            manifest,
            finish_time,
            backend,
            result,
        } => handle_build_completed(state, manifest, *finish_time, backend.as_deref(), result)?,
        Action::ManifestReloaded { old, new } => handle_manifest_reloaded(state, old, new),
        Action::LogAppended { manifest, line } => {
            if let Some(ms) = manifest
                .as_ref()
                .and_then(|name| state.manifest_states.get_mut(name))
            {
                ms.current_build_log.push(line.clone());
            }
            state.log.push(manifest.clone(), line.clone());
        }
    }
    Ok(())
}

/// Request a build of `name`.
///
/// A manifest that is building right now is left out of the queue; its
/// completion re-enqueues it if work accumulated meanwhile.
fn enqueue_build(state: &mut EngineState, name: &ManifestName, reason: BuildReason) {
    let Some(ms) = state.manifest_states.get_mut(name) else {
        return;
    };
    ms.pending_reason = Some(ms.pending_reason.map_or(reason, |r| r.max(reason)));

    let building = state.currently_building.as_ref() == Some(name);
    if !building && !state.manifests_to_build.contains(name) {
        state.manifests_to_build.push_back(name.clone());
    }
    state.build_controller_action_count += 1;
}

fn handle_file_changed(state: &mut EngineState, path: &Path, detected_at: DateTime<Utc>) {
    let mut to_enqueue = Vec::new();
    for name in &state.definition_order {
        let Some(ms) = state.manifest_states.get_mut(name) else {
            continue;
        };
        if ms.manifest.is_config_file(path) {
            ms.config_is_dirty = true;
            to_enqueue.push((name.clone(), BuildReason::ConfigReload));
        } else if ms.manifest.watches(path) {
            ms.pending_file_changes
                .insert(path.to_path_buf(), detected_at);
            if ms.manifest.trigger_mode == TriggerMode::Auto {
                to_enqueue.push((name.clone(), BuildReason::FileChange));
            }
        }
    }
    if to_enqueue.is_empty() {
        debug!("change to {} matches no manifest", path.display());
    }
    for (name, reason) in to_enqueue {
        enqueue_build(state, &name, reason);
    }
}

fn handle_manifest_added(state: &mut EngineState, manifest: &Manifest) {
    let name = manifest.name.clone();
    if let Some(ms) = state.manifest_states.get_mut(&name) {
        debug!("manifest '{name}' redefined");
        if ms.manifest != *manifest {
            ms.manifest = manifest.clone();
            ms.last_result = None;
        }
        ms.config_is_dirty = false;
        ms.config_error = None;
        enqueue_build(state, &name, BuildReason::ConfigReload);
        return;
    }
    state
        .manifest_states
        .insert(name.clone(), ManifestState::new(manifest.clone()));
    state.definition_order.push(name.clone());
    enqueue_build(state, &name, BuildReason::Initial);
}

fn handle_manifest_removed(state: &mut EngineState, name: &ManifestName) {
    if state.manifest_states.remove(name).is_none() {
        warn!("ignoring removal of unknown manifest '{name}'");
        return;
    }
    state.definition_order.retain(|n| n != name);
    state.manifests_to_build.retain(|n| n != name);
    state.build_controller_action_count += 1;
}

fn handle_build_started(
    state: &mut EngineState,
    name: &ManifestName,
    start_time: DateTime<Utc>,
    files_changed: &[PathBuf],
    first_build: bool,
) -> Result<(), StoreError> {
    if let Some(building) = &state.currently_building {
        return Err(StoreError::InvariantViolation(format!(
            "build of '{name}' started while '{building}' is still building"
        )));
    }
    state.manifests_to_build.retain(|n| n != name);
    state.build_controller_action_count += 1;

    let max_history = state.max_build_history;
    let Some(ms) = state.manifest_states.get_mut(name) else {
        warn!("build started for removed manifest '{name}'");
        state.currently_building = Some(name.clone());
        return Ok(());
    };
    state.currently_building = Some(name.clone());

    for path in files_changed {
        ms.pending_file_changes.remove(path);
    }
    let fallback = if first_build {
        BuildReason::Initial
    } else {
        BuildReason::FileChange
    };
    let reason = ms.pending_reason.take().unwrap_or(fallback);
    ms.current_build_log.clear();
    ms.build_history.push_front(BuildRecord {
        start_time,
        finish_time: None,
        edits: files_changed.to_vec(),
        error: None,
        reason,
        backend: None,
    });
    ms.build_history.truncate(max_history);
    Ok(())
}

fn handle_build_completed(
    state: &mut EngineState,
    name: &ManifestName,
    finish_time: DateTime<Utc>,
    backend: Option<&str>,
    result: &Result<crate::BuildResult, String>,
) -> Result<(), StoreError> {
    if state.currently_building.as_ref() != Some(name) {
        return Err(StoreError::InvariantViolation(format!(
            "build of '{name}' completed but {} is building",
            state
                .currently_building
                .as_ref()
                .map_or_else(|| "nothing".to_owned(), |n| format!("'{n}'"))
        )));
    }
    state.currently_building = None;
    state.completed_build_count += 1;
    state.build_controller_action_count += 1;

    let Some(ms) = state.manifest_states.get_mut(name) else {
        debug!("dropping completion of removed manifest '{name}'");
        return Ok(());
    };
    // No in-progress record: the manifest was redefined after this build
    // started, so the result belongs to a definition that is gone.
    let Some(record) = ms.build_history.front_mut().filter(|r| r.is_in_progress()) else {
        debug!("dropping completion of superseded build of '{name}'");
        if ms.has_pending_work() || !ms.has_been_built {
            let fallback = if ms.has_been_built {
                BuildReason::FileChange
            } else {
                BuildReason::Initial
            };
            let reason = ms.pending_reason.unwrap_or(fallback);
            enqueue_build(state, name, reason);
        }
        return Ok(());
    };
    record.finish_time = Some(finish_time);
    record.backend = backend.map(str::to_owned);
    record.error = result.as_ref().err().cloned();
    ms.has_been_built = true;
    match result {
        Ok(build) => ms.last_result = Some(build.clone()),
        Err(e) => debug!("build of '{name}' failed: {e}"),
    }

    let requeue = ms.has_pending_work()
        && (ms.manifest.trigger_mode == TriggerMode::Auto
            || ms.pending_reason.is_some()
            || ms.config_is_dirty);
    if requeue {
        let reason = ms.pending_reason.unwrap_or(BuildReason::FileChange);
        enqueue_build(state, name, reason);
    }
    Ok(())
}

fn handle_manifest_reloaded(
    state: &mut EngineState,
    old: &Manifest,
    new: &Result<Manifest, String>,
) {
    state.completed_build_count += 1;
    state.build_controller_action_count += 1;

    let name = &old.name;
    let Some(ms) = state.manifest_states.get_mut(name) else {
        debug!("dropping reload of removed manifest '{name}'");
        return;
    };
    match new {
        Err(e) => {
            warn!("reloading manifest '{name}' failed: {e}");
            ms.config_error = Some(e.clone());
            // Stay dirty: the next relevant change retries the reload.
            state.manifests_to_build.retain(|n| n != name);
        }
        Ok(manifest) if manifest.name != *name => {
            let msg = format!(
                "reloaded definition is named '{}', expected '{name}'",
                manifest.name
            );
            warn!("{msg}");
            ms.config_error = Some(msg);
            state.manifests_to_build.retain(|n| n != name);
        }
        Ok(manifest) => {
            ms.config_is_dirty = false;
            ms.config_error = None;
            if ms.manifest != *manifest {
                ms.manifest = manifest.clone();
                ms.last_result = None;
            }
            // The deferred build runs on the next scheduling pass.
            enqueue_build(state, name, BuildReason::ConfigReload);
        }
    }
}
