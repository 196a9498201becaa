use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("manifest name must not be empty")]
    EmptyName,
    #[error("invalid manifest name '{0}': must match [a-zA-Z0-9_.-]")]
    InvalidName(String),
    #[error("manifest '{0}' is declared more than once")]
    DuplicateName(String),
    #[error("manifest '{0}' declares no deploy target (expected [manifest.k8s] or [manifest.compose])")]
    MissingDeployTarget(String),
    #[error("manifest '{0}' declares both a k8s and a compose deploy target")]
    ConflictingDeployTargets(String),
    #[error("manifest '{0}' deploys to k8s but declares no [manifest.image]")]
    MissingImage(String),
    #[error("manifest '{name}': image.ref must not be empty")]
    EmptyImageRef { name: String },
    #[error("manifest '{name}': compose.service must not be empty")]
    EmptyComposeService { name: String },
    #[error("invalid sync rule for '{name}': '{rule}', expected '<local>:<container>'")]
    InvalidSyncRule { name: String, rule: String },
    #[error("manifest '{name}': unknown trigger mode '{value}', expected 'auto' or 'manual'")]
    InvalidTrigger { name: String, value: String },
    #[error("unknown update_mode '{0}', expected 'auto', 'image' or 'container'")]
    InvalidUpdateMode(String),
    #[error("engine.action_queue_capacity must be greater than 0")]
    ZeroQueueCapacity,
    #[error("no manifest named '{0}' in config")]
    NotFound(String),
    #[error("expected exactly 1 manifest named '{name}', got {count}")]
    Ambiguous { name: String, count: usize },
}

/// Raw contents of a `kiln.toml` config file, before normalization.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigV1 {
    pub config_version: u32,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default, rename = "manifest")]
    pub manifests: Vec<ManifestSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_queue_capacity")]
    pub action_queue_capacity: usize,
    #[serde(default = "default_max_build_history")]
    pub max_build_history: usize,
    #[serde(default = "default_update_mode")]
    pub update_mode: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            action_queue_capacity: default_queue_capacity(),
            max_build_history: default_max_build_history(),
            update_mode: default_update_mode(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManifestSection {
    pub name: String,
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default)]
    pub watch: Vec<String>,
    #[serde(default)]
    pub image: Option<ImageSection>,
    #[serde(default)]
    pub k8s: Option<K8sSection>,
    #[serde(default)]
    pub compose: Option<ComposeSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ImageSection {
    #[serde(rename = "ref")]
    pub image_ref: String,
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default)]
    pub sync: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct K8sSection {
    pub yaml: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ComposeSection {
    #[serde(default = "default_compose_file")]
    pub file: String,
    pub service: String,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_build_history() -> usize {
    10
}

fn default_update_mode() -> String {
    "auto".to_owned()
}

fn default_trigger() -> String {
    "auto".to_owned()
}

fn default_context() -> String {
    ".".to_owned()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_owned()
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_owned()
}

pub fn parse_config_str(input: &str) -> Result<ConfigV1, ManifestError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<ConfigV1, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let input = r#"
config_version = 1

[engine]
action_queue_capacity = 64
max_build_history = 3
update_mode = "container"

[features]
snapshots = true

[[manifest]]
name = "frontend"
trigger = "manual"
watch = ["shared"]

[manifest.image]
ref = "registry.local/frontend"
context = "frontend"
sync = ["frontend/src:/app/src"]

[manifest.k8s]
yaml = "k8s/frontend.yaml"

[[manifest]]
name = "db"

[manifest.compose]
service = "db"
"#;
        let config = parse_config_str(input).expect("should parse");
        assert_eq!(config.config_version, 1);
        assert_eq!(config.engine.action_queue_capacity, 64);
        assert_eq!(config.engine.update_mode, "container");
        assert_eq!(config.features.get("snapshots"), Some(&true));
        assert_eq!(config.manifests.len(), 2);

        let frontend = &config.manifests[0];
        assert_eq!(frontend.trigger, "manual");
        let image = frontend.image.as_ref().unwrap();
        assert_eq!(image.image_ref, "registry.local/frontend");
        assert_eq!(image.dockerfile, "Dockerfile");
        assert_eq!(image.sync, vec!["frontend/src:/app/src".to_owned()]);

        let db = &config.manifests[1];
        assert_eq!(db.trigger, "auto");
        assert_eq!(db.compose.as_ref().unwrap().file, "docker-compose.yml");
    }

    #[test]
    fn parses_minimal_config() {
        let config = parse_config_str("config_version = 1\n").expect("should parse");
        assert!(config.manifests.is_empty());
        assert_eq!(config.engine, EngineSection::default());
        assert_eq!(config.engine.max_build_history, 10);
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"
config_version = 1

[[manifest]]
name = "api"
unknown_field = true
"#;
        assert!(parse_config_str(input).is_err());
    }

    #[test]
    fn rejects_missing_version() {
        let input = r#"
[[manifest]]
name = "api"
"#;
        assert!(parse_config_str(input).is_err());
    }
}
