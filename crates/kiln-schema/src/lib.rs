//! Config parsing, manifest normalization, and manifest reloading for kiln.
//!
//! This crate defines the definition layer: TOML config parsing (`ConfigV1`),
//! the normalized `Manifest` model with its build and deploy targets, string
//! identifier newtypes, and the `ManifestSource` collaborator used to reload a
//! single manifest when its config changes.

pub mod loader;
pub mod manifest;
pub mod normalize;
pub mod types;

pub use loader::{load_project, ConfigFileSource, ManifestSource};
pub use manifest::{
    parse_config_file, parse_config_str, ComposeSection, ConfigV1, EngineSection, ImageSection,
    K8sSection, ManifestError, ManifestSection,
};
pub use normalize::{
    validate_manifest_name, ClusterTarget, ComposeTarget, DeployTarget, EngineSettings,
    ImageTarget, Manifest, ProjectConfig, SyncRule, TriggerMode, UpdateMode,
};
pub use types::{ContainerId, ImageRef, ManifestName};
