use crate::manifest::{parse_config_file, ManifestError};
use crate::normalize::{Manifest, ProjectConfig};
use crate::types::ManifestName;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Source of manifest definitions, consulted when a manifest's config is dirty.
pub trait ManifestSource: Send + Sync {
    /// Re-read the definition of a single manifest.
    fn reload(&self, name: &ManifestName) -> Result<Manifest, ManifestError>;
}

/// Load and validate a whole config file.
pub fn load_project(path: &Path) -> Result<ProjectConfig, ManifestError> {
    let config = parse_config_file(path)?;
    config.normalize(path)
}

/// Reloads manifests from a `kiln.toml` on disk.
pub struct ConfigFileSource {
    path: PathBuf,
}

impl ConfigFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestSource for ConfigFileSource {
    fn reload(&self, name: &ManifestName) -> Result<Manifest, ManifestError> {
        debug!("reloading manifest '{name}' from {}", self.path.display());
        let config = parse_config_file(&self.path)?;

        let count = config
            .manifests
            .iter()
            .filter(|m| m.name.trim() == name.as_str())
            .count();
        match count {
            0 => return Err(ManifestError::NotFound(name.to_string())),
            1 => {}
            n => {
                return Err(ManifestError::Ambiguous {
                    name: name.to_string(),
                    count: n,
                })
            }
        }

        // Validate the whole file so a broken sibling is reported too.
        let project = config.normalize(&self.path)?;
        project
            .manifests
            .into_iter()
            .find(|m| m.name == *name)
            .ok_or_else(|| ManifestError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CONFIG: &str = r#"
config_version = 1

[[manifest]]
name = "db"
[manifest.compose]
service = "db"

[[manifest]]
name = "cache"
[manifest.compose]
service = "redis"
"#;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("kiln.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_project_reads_all_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);

        let project = load_project(&path).unwrap();
        let names: Vec<_> = project.manifests.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["db", "cache"]);
    }

    #[test]
    fn reload_returns_the_named_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        let source = ConfigFileSource::new(&path);

        let manifest = source.reload(&ManifestName::from("cache")).unwrap();
        assert_eq!(manifest.name, "cache");
        assert_eq!(manifest.config_files, vec![path]);
    }

    #[test]
    fn reload_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        let source = ConfigFileSource::new(&path);

        fs::write(&path, CONFIG.replace("service = \"redis\"", "service = \"valkey\"")).unwrap();

        let manifest = source.reload(&ManifestName::from("cache")).unwrap();
        match manifest.deploy {
            crate::DeployTarget::Compose(c) => assert_eq!(c.service, "valkey"),
            crate::DeployTarget::Cluster(_) => panic!("expected compose target"),
        }
    }

    #[test]
    fn reload_unknown_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), CONFIG);
        let source = ConfigFileSource::new(&path);

        assert!(matches!(
            source.reload(&ManifestName::from("web")),
            Err(ManifestError::NotFound(n)) if n == "web"
        ));
    }

    #[test]
    fn reload_malformed_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), "config_version = [");
        let source = ConfigFileSource::new(&path);

        assert!(matches!(
            source.reload(&ManifestName::from("db")),
            Err(ManifestError::ParseToml(_))
        ));
    }

    #[test]
    fn reload_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = ConfigFileSource::new(dir.path().join("absent.toml"));

        assert!(matches!(
            source.reload(&ManifestName::from("db")),
            Err(ManifestError::Io(_))
        ));
    }
}
