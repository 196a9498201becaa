use crate::backend::{BackendKind, BuildBackend, BuildContext};
use crate::command::run;
use crate::RuntimeError;
use async_trait::async_trait;
use kiln_schema::{ComposeTarget, ContainerId, DeployTarget, Manifest};
use kiln_store::{BuildResult, BuildState};
use std::ffi::OsStr;
use tracing::info;

/// Builds and restarts one compose service.
#[derive(Debug, Default)]
pub struct ComposeBuildBackend;

impl ComposeBuildBackend {
    pub fn new() -> Self {
        Self
    }
}

async fn compose(
    ctx: &BuildContext,
    target: &ComposeTarget,
    args: &[&str],
) -> Result<String, RuntimeError> {
    let mut full = vec![
        OsStr::new("compose"),
        OsStr::new("-f"),
        target.file.as_os_str(),
    ];
    full.extend(args.iter().map(OsStr::new));
    run(ctx, "docker", full).await
}

#[async_trait]
impl BuildBackend for ComposeBuildBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ComposeBuild
    }

    fn can_handle(&self, manifest: &Manifest, _state: &BuildState) -> bool {
        manifest.is_compose()
    }

    async fn execute(
        &self,
        ctx: &BuildContext,
        manifest: &Manifest,
        state: &BuildState,
    ) -> Result<BuildResult, RuntimeError> {
        let DeployTarget::Compose(target) = &manifest.deploy else {
            return Err(RuntimeError::Redirect(format!(
                "'{}' is not a compose service",
                manifest.name
            )));
        };
        let service = target.service.as_str();

        info!("rebuilding compose service '{service}' for '{}'", manifest.name);
        compose(ctx, target, &["build", service]).await?;
        if ctx.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        compose(ctx, target, &["up", "-d", "--no-deps", service]).await?;
        let ps = compose(ctx, target, &["ps", "-q", service]).await?;

        Ok(BuildResult {
            image: None,
            container_id: ps.lines().next().map(ContainerId::new),
            deployed: vec![format!("compose/{service}")],
            files_applied: state.files_changed().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::{ClusterTarget, ImageRef, ImageTarget, ManifestName, TriggerMode};
    use std::path::PathBuf;
    use tokio_util::sync::CancellationToken;

    fn manifest(deploy: DeployTarget) -> Manifest {
        Manifest {
            name: ManifestName::from("db"),
            trigger_mode: TriggerMode::Auto,
            image: Some(ImageTarget {
                image_ref: ImageRef::new("db"),
                context: PathBuf::from("/p/db"),
                dockerfile: PathBuf::from("/p/db/Dockerfile"),
                sync: Vec::new(),
            }),
            deploy,
            watch_paths: Vec::new(),
            config_files: Vec::new(),
        }
    }

    #[test]
    fn handles_only_compose_manifests() {
        let backend = ComposeBuildBackend::new();
        let compose = manifest(DeployTarget::Compose(ComposeTarget {
            file: PathBuf::from("/p/docker-compose.yml"),
            service: "db".to_owned(),
        }));
        let cluster = manifest(DeployTarget::Cluster(ClusterTarget {
            yaml: PathBuf::from("/p/db.yaml"),
        }));
        assert!(backend.can_handle(&compose, &BuildState::clean()));
        assert!(!backend.can_handle(&cluster, &BuildState::clean()));
    }

    #[tokio::test]
    async fn execute_redirects_cluster_manifests() {
        let backend = ComposeBuildBackend::new();
        let ctx = BuildContext::detached(CancellationToken::new());
        let cluster = manifest(DeployTarget::Cluster(ClusterTarget {
            yaml: PathBuf::from("/p/db.yaml"),
        }));
        let err = backend
            .execute(&ctx, &cluster, &BuildState::clean())
            .await
            .unwrap_err();
        assert!(err.is_redirect());
    }
}
