use crate::build::{BuildResult, BuildState};
use crate::StoreError;
use chrono::{DateTime, Utc};
use kiln_schema::{Manifest, ManifestName};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::PathBuf;

/// Upper bound on lines kept in the global log store.
pub const MAX_LOG_LINES: usize = 10_000;

/// Why a build was requested, ranked from weakest to strongest.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildReason {
    FileChange,
    ConfigReload,
    Manual,
    Initial,
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildReason::FileChange => write!(f, "file change"),
            BuildReason::ConfigReload => write!(f, "config reload"),
            BuildReason::Manual => write!(f, "manual trigger"),
            BuildReason::Initial => write!(f, "initial build"),
        }
    }
}

/// Snapshot of one build attempt.
///
/// Appended provisionally when the build starts; `finish_time` is set when
/// its completion is reduced.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BuildRecord {
    pub start_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
    pub edits: Vec<PathBuf>,
    pub error: Option<String>,
    pub reason: BuildReason,
    pub backend: Option<String>,
}

impl BuildRecord {
    pub fn is_in_progress(&self) -> bool {
        self.finish_time.is_none()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finish_time.map(|finish| finish - self.start_time)
    }
}

/// Derived per-manifest status, for observers.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    Pending,
    Building,
    Ok,
    Error,
    ConfigError,
}

impl fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestStatus::Pending => write!(f, "pending"),
            ManifestStatus::Building => write!(f, "building"),
            ManifestStatus::Ok => write!(f, "ok"),
            ManifestStatus::Error => write!(f, "error"),
            ManifestStatus::ConfigError => write!(f, "config error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestState {
    pub manifest: Manifest,
    /// Changed path to the time the change was detected.
    pub pending_file_changes: BTreeMap<PathBuf, DateTime<Utc>>,
    /// Strongest reason among the build requests not yet served.
    pub pending_reason: Option<BuildReason>,
    pub has_been_built: bool,
    pub config_is_dirty: bool,
    pub config_error: Option<String>,
    /// Result of the last successful build; the base for in-place updates.
    pub last_result: Option<BuildResult>,
    /// Most recent first.
    pub build_history: VecDeque<BuildRecord>,
    pub current_build_log: Vec<String>,
}

impl ManifestState {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            pending_file_changes: BTreeMap::new(),
            pending_reason: None,
            has_been_built: false,
            config_is_dirty: false,
            config_error: None,
            last_result: None,
            build_history: VecDeque::new(),
            current_build_log: Vec::new(),
        }
    }

    pub fn name(&self) -> &ManifestName {
        &self.manifest.name
    }

    /// Most recent finished build.
    pub fn last_build(&self) -> Option<&BuildRecord> {
        self.build_history.iter().find(|r| !r.is_in_progress())
    }

    pub fn current_build(&self) -> Option<&BuildRecord> {
        self.build_history.front().filter(|r| r.is_in_progress())
    }

    /// Pending changed paths, sorted.
    pub fn pending_paths(&self) -> Vec<PathBuf> {
        self.pending_file_changes.keys().cloned().collect()
    }

    /// Build input for the next attempt, from the last result and pending changes.
    pub fn next_build_state(&self) -> BuildState {
        BuildState::new(
            self.last_result.clone(),
            self.pending_paths(),
            !self.has_been_built,
        )
    }

    /// Whether work accumulated that a further build should pick up.
    pub fn has_pending_work(&self) -> bool {
        !self.pending_file_changes.is_empty() || self.pending_reason.is_some() || self.config_is_dirty
    }

    pub fn status(&self) -> ManifestStatus {
        if self.current_build().is_some() {
            return ManifestStatus::Building;
        }
        if self.config_error.is_some() {
            return ManifestStatus::ConfigError;
        }
        match self.last_build() {
            Some(record) if record.error.is_some() => ManifestStatus::Error,
            Some(_) => ManifestStatus::Ok,
            None => ManifestStatus::Pending,
        }
    }
}

/// One line in the global log store.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LogLine {
    /// Position among all lines ever appended, starting at 1.
    pub seq: u64,
    pub manifest: Option<ManifestName>,
    pub text: String,
}

/// Bounded, append-only log of everything the engine printed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogStore {
    lines: VecDeque<LogLine>,
    last_seq: u64,
}

impl LogStore {
    pub fn push(&mut self, manifest: Option<ManifestName>, text: String) {
        self.last_seq += 1;
        self.lines.push_back(LogLine {
            seq: self.last_seq,
            manifest,
            text,
        });
        while self.lines.len() > MAX_LOG_LINES {
            self.lines.pop_front();
        }
    }

    /// Lines appended after `seq`, oldest first.
    pub fn since(&self, seq: u64) -> impl Iterator<Item = &LogLine> {
        self.lines.iter().filter(move |l| l.seq > seq)
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// The single state tree, owned by the [`Store`](crate::Store).
#[derive(Debug, Clone, Serialize)]
pub struct EngineState {
    pub manifest_states: BTreeMap<ManifestName, ManifestState>,
    /// FIFO of manifests awaiting a build; a name appears at most once.
    pub manifests_to_build: VecDeque<ManifestName>,
    /// Bumped by every action that changes build-relevant state.
    pub build_controller_action_count: u64,
    /// Bumped by every `BuildCompleted` and `ManifestReloaded`.
    pub completed_build_count: u64,
    pub currently_building: Option<ManifestName>,
    pub definition_order: Vec<ManifestName>,
    pub features: BTreeMap<String, bool>,
    pub max_build_history: usize,
    pub log: LogStore,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            manifest_states: BTreeMap::new(),
            manifests_to_build: VecDeque::new(),
            build_controller_action_count: 0,
            completed_build_count: 0,
            currently_building: None,
            definition_order: Vec::new(),
            features: BTreeMap::new(),
            max_build_history: 10,
            log: LogStore::default(),
        }
    }
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_features(mut self, features: BTreeMap<String, bool>) -> Self {
        self.features = features;
        self
    }

    #[must_use]
    pub fn with_max_build_history(mut self, max: usize) -> Self {
        self.max_build_history = max.max(1);
        self
    }

    pub fn manifest_state(&self, name: &ManifestName) -> Option<&ManifestState> {
        self.manifest_states.get(name)
    }

    /// Manifest states in definition order.
    pub fn manifests(&self) -> impl Iterator<Item = &ManifestState> {
        self.definition_order
            .iter()
            .filter_map(|name| self.manifest_states.get(name))
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn is_queued(&self, name: &ManifestName) -> bool {
        self.manifests_to_build.contains(name)
    }

    /// Verify the structural invariants every reduction must preserve.
    pub fn check_invariants(&self) -> Result<(), StoreError> {
        let mut seen = BTreeSet::new();
        for name in &self.manifests_to_build {
            if !seen.insert(name) {
                return Err(StoreError::InvariantViolation(format!(
                    "manifest '{name}' is queued more than once"
                )));
            }
            if !self.manifest_states.contains_key(name) {
                return Err(StoreError::InvariantViolation(format!(
                    "queued manifest '{name}' does not exist"
                )));
            }
        }
        if let Some(building) = &self.currently_building {
            if self.is_queued(building) {
                return Err(StoreError::InvariantViolation(format!(
                    "manifest '{building}' is queued while it is building"
                )));
            }
        }
        if self.definition_order.len() != self.manifest_states.len() {
            return Err(StoreError::InvariantViolation(format!(
                "definition order lists {} manifests, state holds {}",
                self.definition_order.len(),
                self.manifest_states.len()
            )));
        }
        Ok(())
    }
}
