use kiln_schema::{ContainerId, ImageRef};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a backend produced or updated for one build.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildResult {
    /// Image reference that was built and deployed, if any.
    pub image: Option<ImageRef>,
    /// Container now running the manifest's code, if known.
    pub container_id: Option<ContainerId>,
    /// Identifiers of the deploy objects that were created or updated.
    pub deployed: Vec<String>,
    /// Files the backend actually applied, echoed back for bookkeeping.
    pub files_applied: Vec<PathBuf>,
}

impl BuildResult {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.container_id.is_none() && self.deployed.is_empty()
    }
}

/// Input to one build attempt: the last successful result plus the files
/// changed since.
///
/// Created fresh per attempt and handed to backends read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildState {
    last_result: Option<BuildResult>,
    files_changed: Vec<PathBuf>,
    first_build: bool,
}

impl BuildState {
    /// Build state from a previous result and an unordered set of changed files.
    ///
    /// The file list is sorted and deduplicated so that backends see a
    /// deterministic ordering.
    pub fn new(
        last_result: Option<BuildResult>,
        files_changed: impl IntoIterator<Item = PathBuf>,
        first_build: bool,
    ) -> Self {
        let mut files_changed: Vec<PathBuf> = files_changed.into_iter().collect();
        files_changed.sort();
        files_changed.dedup();
        Self {
            last_result,
            files_changed,
            first_build,
        }
    }

    /// State for a build with no history at all.
    pub fn clean() -> Self {
        Self {
            last_result: None,
            files_changed: Vec::new(),
            first_build: true,
        }
    }

    pub fn files_changed(&self) -> &[PathBuf] {
        &self.files_changed
    }

    pub fn last_result(&self) -> Option<&BuildResult> {
        self.last_result.as_ref()
    }

    pub fn is_first_build(&self) -> bool {
        self.first_build
    }

    /// Whether no previous deployment exists to build on.
    pub fn is_empty(&self) -> bool {
        !self.last_result.as_ref().is_some_and(|r| !r.is_empty())
    }

    /// Container deployed by the previous build, if one is known.
    pub fn running_container(&self) -> Option<&ContainerId> {
        self.last_result.as_ref()?.container_id.as_ref()
    }
}
