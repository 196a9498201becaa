use crate::manifest::{ConfigV1, ManifestError, ManifestSection};
use crate::types::{ImageRef, ManifestName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Whether file changes alone are enough to enqueue a build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    #[default]
    Auto,
    Manual,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Auto => f.pad("auto"),
            TriggerMode::Manual => f.pad("manual"),
        }
    }
}

/// How aggressively in-place updates are used for cluster deployments.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Pick the cheapest strategy the environment supports.
    #[default]
    Auto,
    /// Always rebuild and redeploy the image.
    Image,
    /// Force in-place container updates, even against a non-local cluster.
    Container,
}

impl FromStr for UpdateMode {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "image" => Ok(Self::Image),
            "container" => Ok(Self::Container),
            other => Err(ManifestError::InvalidUpdateMode(other.to_owned())),
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateMode::Auto => write!(f, "auto"),
            UpdateMode::Image => write!(f, "image"),
            UpdateMode::Container => write!(f, "container"),
        }
    }
}

/// A live-update rule mapping a local directory into a running container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRule {
    pub local: PathBuf,
    pub container: PathBuf,
}

impl SyncRule {
    /// Container path for `path`, if this rule covers it.
    pub fn container_path(&self, path: &Path) -> Option<PathBuf> {
        let rel = path.strip_prefix(&self.local).ok()?;
        if rel.as_os_str().is_empty() {
            Some(self.container.clone())
        } else {
            Some(self.container.join(rel))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageTarget {
    pub image_ref: ImageRef,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
    pub sync: Vec<SyncRule>,
}

impl ImageTarget {
    /// Map a changed local file to its location inside the container.
    ///
    /// Returns `None` when no sync rule covers the file.
    pub fn sync_target(&self, path: &Path) -> Option<PathBuf> {
        self.sync.iter().find_map(|rule| rule.container_path(path))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterTarget {
    pub yaml: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeTarget {
    pub file: PathBuf,
    pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeployTarget {
    Cluster(ClusterTarget),
    Compose(ComposeTarget),
}

/// A named, declarative description of one deployable unit.
///
/// All paths are absolute (resolved against the config file's directory).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub name: ManifestName,
    pub trigger_mode: TriggerMode,
    pub image: Option<ImageTarget>,
    pub deploy: DeployTarget,
    pub watch_paths: Vec<PathBuf>,
    pub config_files: Vec<PathBuf>,
}

impl Manifest {
    pub fn is_compose(&self) -> bool {
        matches!(self.deploy, DeployTarget::Compose(_))
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self.deploy, DeployTarget::Cluster(_))
    }

    pub fn deploy_kind(&self) -> &'static str {
        match self.deploy {
            DeployTarget::Cluster(_) => "k8s",
            DeployTarget::Compose(_) => "compose",
        }
    }

    /// Whether a change to `path` affects this manifest's build inputs.
    pub fn watches(&self, path: &Path) -> bool {
        if self.watch_paths.iter().any(|w| path.starts_with(w)) {
            return true;
        }
        if let Some(image) = &self.image {
            if path.starts_with(&image.context) {
                return true;
            }
        }
        match &self.deploy {
            DeployTarget::Cluster(c) => path == c.yaml,
            DeployTarget::Compose(c) => path == c.file,
        }
    }

    /// Whether a change to `path` may make this manifest's definition stale.
    pub fn is_config_file(&self, path: &Path) -> bool {
        self.config_files.iter().any(|f| f == path)
    }
}

/// Engine settings from the `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSettings {
    pub action_queue_capacity: usize,
    pub max_build_history: usize,
    pub update_mode: UpdateMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            action_queue_capacity: 1024,
            max_build_history: 10,
            update_mode: UpdateMode::Auto,
        }
    }
}

/// A fully validated config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    pub engine: EngineSettings,
    pub features: BTreeMap<String, bool>,
    pub manifests: Vec<Manifest>,
}

impl ConfigV1 {
    /// Validate the config and resolve it into manifests.
    ///
    /// Relative paths are resolved against the directory containing
    /// `config_path`, and `config_path` itself becomes every manifest's
    /// config file.
    pub fn normalize(&self, config_path: &Path) -> Result<ProjectConfig, ManifestError> {
        if self.config_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.config_version));
        }
        if self.engine.action_queue_capacity == 0 {
            return Err(ManifestError::ZeroQueueCapacity);
        }
        let update_mode = self.engine.update_mode.parse()?;

        let base_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut seen = BTreeSet::new();
        let mut manifests = Vec::with_capacity(self.manifests.len());
        for section in &self.manifests {
            let manifest = section.normalize(base_dir, config_path)?;
            if !seen.insert(manifest.name.clone()) {
                return Err(ManifestError::DuplicateName(manifest.name.into_inner()));
            }
            manifests.push(manifest);
        }

        Ok(ProjectConfig {
            engine: EngineSettings {
                action_queue_capacity: self.engine.action_queue_capacity,
                max_build_history: self.engine.max_build_history,
                update_mode,
            },
            features: self.features.clone(),
            manifests,
        })
    }
}

impl ManifestSection {
    fn normalize(&self, base_dir: &Path, config_path: &Path) -> Result<Manifest, ManifestError> {
        let name = self.name.trim();
        validate_manifest_name(name)?;

        let trigger_mode = match self.trigger.trim().to_lowercase().as_str() {
            "auto" => TriggerMode::Auto,
            "manual" => TriggerMode::Manual,
            other => {
                return Err(ManifestError::InvalidTrigger {
                    name: name.to_owned(),
                    value: other.to_owned(),
                })
            }
        };

        let image = match &self.image {
            Some(section) => {
                let image_ref = section.image_ref.trim();
                if image_ref.is_empty() {
                    return Err(ManifestError::EmptyImageRef {
                        name: name.to_owned(),
                    });
                }
                let context = base_dir.join(section.context.trim());
                let dockerfile = context.join(section.dockerfile.trim());
                let sync = section
                    .sync
                    .iter()
                    .map(|rule| parse_sync_rule(name, rule, base_dir))
                    .collect::<Result<Vec<_>, _>>()?;
                Some(ImageTarget {
                    image_ref: ImageRef::new(image_ref),
                    context,
                    dockerfile,
                    sync,
                })
            }
            None => None,
        };

        let deploy = match (&self.k8s, &self.compose) {
            (Some(_), Some(_)) => {
                return Err(ManifestError::ConflictingDeployTargets(name.to_owned()))
            }
            (None, None) => return Err(ManifestError::MissingDeployTarget(name.to_owned())),
            (Some(k8s), None) => {
                if image.is_none() {
                    return Err(ManifestError::MissingImage(name.to_owned()));
                }
                DeployTarget::Cluster(ClusterTarget {
                    yaml: base_dir.join(k8s.yaml.trim()),
                })
            }
            (None, Some(compose)) => {
                let service = compose.service.trim();
                if service.is_empty() {
                    return Err(ManifestError::EmptyComposeService {
                        name: name.to_owned(),
                    });
                }
                DeployTarget::Compose(ComposeTarget {
                    file: base_dir.join(compose.file.trim()),
                    service: service.to_owned(),
                })
            }
        };

        let mut watch_paths: Vec<PathBuf> = self
            .watch
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(|w| base_dir.join(w))
            .collect();
        watch_paths.sort();
        watch_paths.dedup();

        Ok(Manifest {
            name: ManifestName::new(name),
            trigger_mode,
            image,
            deploy,
            watch_paths,
            config_files: vec![config_path.to_path_buf()],
        })
    }
}

pub fn validate_manifest_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::EmptyName);
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(ManifestError::InvalidName(name.to_owned()));
    }
    Ok(())
}

fn parse_sync_rule(name: &str, rule: &str, base_dir: &Path) -> Result<SyncRule, ManifestError> {
    let invalid = || ManifestError::InvalidSyncRule {
        name: name.to_owned(),
        rule: rule.to_owned(),
    };
    let (local_raw, container_raw) = rule.split_once(':').ok_or_else(invalid)?;

    let local = local_raw.trim();
    let container = container_raw.trim();
    if local.is_empty() || container.is_empty() || !container.starts_with('/') {
        return Err(invalid());
    }

    Ok(SyncRule {
        local: base_dir.join(local),
        container: PathBuf::from(container),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_config_str;

    const CONFIG: &str = r#"
config_version = 1

[[manifest]]
name = "frontend"
watch = ["shared", "shared"]

[manifest.image]
ref = "registry.local/frontend"
context = "frontend"
sync = ["frontend/src:/app/src"]

[manifest.k8s]
yaml = "k8s/frontend.yaml"

[[manifest]]
name = "db"
trigger = "manual"

[manifest.compose]
service = "db"
"#;

    fn normalize(input: &str) -> Result<ProjectConfig, ManifestError> {
        parse_config_str(input)
            .unwrap()
            .normalize(Path::new("/project/kiln.toml"))
    }

    #[test]
    fn resolves_paths_against_config_dir() {
        let project = normalize(CONFIG).unwrap();
        let frontend = &project.manifests[0];
        let image = frontend.image.as_ref().unwrap();

        assert_eq!(image.context, PathBuf::from("/project/frontend"));
        assert_eq!(image.dockerfile, PathBuf::from("/project/frontend/Dockerfile"));
        assert_eq!(image.sync[0].local, PathBuf::from("/project/frontend/src"));
        assert_eq!(frontend.watch_paths, vec![PathBuf::from("/project/shared")]);
        assert_eq!(frontend.config_files, vec![PathBuf::from("/project/kiln.toml")]);
        assert!(frontend.is_cluster());
    }

    #[test]
    fn compose_manifest_defaults() {
        let project = normalize(CONFIG).unwrap();
        let db = &project.manifests[1];
        assert!(db.is_compose());
        assert_eq!(db.trigger_mode, TriggerMode::Manual);
        assert_eq!(db.deploy_kind(), "compose");
        match &db.deploy {
            DeployTarget::Compose(c) => {
                assert_eq!(c.file, PathBuf::from("/project/docker-compose.yml"));
                assert_eq!(c.service, "db");
            }
            DeployTarget::Cluster(_) => panic!("expected compose target"),
        }
    }

    #[test]
    fn watches_context_extra_paths_and_deploy_file() {
        let project = normalize(CONFIG).unwrap();
        let frontend = &project.manifests[0];

        assert!(frontend.watches(Path::new("/project/frontend/src/main.ts")));
        assert!(frontend.watches(Path::new("/project/shared/util.ts")));
        assert!(frontend.watches(Path::new("/project/k8s/frontend.yaml")));
        assert!(!frontend.watches(Path::new("/project/frontend-old/x")));
        assert!(!frontend.watches(Path::new("/project/kiln.toml")));
        assert!(frontend.is_config_file(Path::new("/project/kiln.toml")));
    }

    #[test]
    fn sync_target_maps_into_container() {
        let project = normalize(CONFIG).unwrap();
        let image = project.manifests[0].image.clone().unwrap();

        assert_eq!(
            image.sync_target(Path::new("/project/frontend/src/app/main.ts")),
            Some(PathBuf::from("/app/src/app/main.ts"))
        );
        assert_eq!(image.sync_target(Path::new("/project/frontend/package.json")), None);
    }

    #[test]
    fn rejects_duplicate_names() {
        let input = r#"
config_version = 1
[[manifest]]
name = "db"
[manifest.compose]
service = "db"
[[manifest]]
name = "db"
[manifest.compose]
service = "db2"
"#;
        assert!(matches!(
            normalize(input),
            Err(ManifestError::DuplicateName(n)) if n == "db"
        ));
    }

    #[test]
    fn rejects_missing_and_conflicting_deploy_targets() {
        let missing = r#"
config_version = 1
[[manifest]]
name = "api"
"#;
        assert!(matches!(
            normalize(missing),
            Err(ManifestError::MissingDeployTarget(_))
        ));

        let both = r#"
config_version = 1
[[manifest]]
name = "api"
[manifest.image]
ref = "api"
[manifest.k8s]
yaml = "api.yaml"
[manifest.compose]
service = "api"
"#;
        assert!(matches!(
            normalize(both),
            Err(ManifestError::ConflictingDeployTargets(_))
        ));
    }

    #[test]
    fn rejects_k8s_without_image() {
        let input = r#"
config_version = 1
[[manifest]]
name = "api"
[manifest.k8s]
yaml = "api.yaml"
"#;
        assert!(matches!(normalize(input), Err(ManifestError::MissingImage(_))));
    }

    #[test]
    fn rejects_invalid_sync_rule() {
        let input = r#"
config_version = 1
[[manifest]]
name = "api"
[manifest.image]
ref = "api"
sync = ["src"]
[manifest.k8s]
yaml = "api.yaml"
"#;
        assert!(matches!(
            normalize(input),
            Err(ManifestError::InvalidSyncRule { .. })
        ));
    }

    #[test]
    fn rejects_bad_trigger_and_update_mode() {
        let trigger = r#"
config_version = 1
[[manifest]]
name = "db"
trigger = "sometimes"
[manifest.compose]
service = "db"
"#;
        assert!(matches!(
            normalize(trigger),
            Err(ManifestError::InvalidTrigger { .. })
        ));

        let mode = r#"
config_version = 1
[engine]
update_mode = "synclet"
"#;
        assert!(matches!(
            normalize(mode),
            Err(ManifestError::InvalidUpdateMode(m)) if m == "synclet"
        ));
    }

    #[test]
    fn rejects_unsupported_version() {
        assert!(matches!(
            normalize("config_version = 2\n"),
            Err(ManifestError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn validate_manifest_name_rules() {
        assert!(validate_manifest_name("api-v2.internal_1").is_ok());
        assert!(validate_manifest_name("").is_err());
        assert!(validate_manifest_name("has space").is_err());
        assert!(validate_manifest_name("a/b").is_err());
    }

    #[test]
    fn update_mode_parses_case_insensitively() {
        assert_eq!("Image".parse::<UpdateMode>().unwrap(), UpdateMode::Image);
        assert_eq!(UpdateMode::Container.to_string(), "container");
    }
}
