use crate::backend::{BackendKind, BuildBackend, BuildContext};
use crate::command::run;
use crate::RuntimeError;
use async_trait::async_trait;
use chrono::Utc;
use kiln_schema::{ContainerId, DeployTarget, ImageRef, Manifest};
use kiln_store::{BuildResult, BuildState};
use std::ffi::OsStr;
use tracing::{debug, info};

/// Unique tag for an image built now.
pub fn build_tag() -> String {
    format!("kiln-{}", Utc::now().format("%Y%m%d%H%M%S%3f"))
}

/// Object names from `kubectl apply` output, e.g. `deployment.apps/web configured`.
pub fn parse_applied(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|obj| obj.contains('/'))
        .map(str::to_owned)
        .collect()
}

/// Builds the manifest's image and applies its cluster objects.
#[derive(Debug, Default)]
pub struct ImageBuildBackend;

impl ImageBuildBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildBackend for ImageBuildBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ImageBuild
    }

    fn can_handle(&self, manifest: &Manifest, _state: &BuildState) -> bool {
        manifest.is_cluster() && manifest.image.is_some()
    }

    async fn execute(
        &self,
        ctx: &BuildContext,
        manifest: &Manifest,
        state: &BuildState,
    ) -> Result<BuildResult, RuntimeError> {
        let (Some(image), DeployTarget::Cluster(cluster)) = (&manifest.image, &manifest.deploy)
        else {
            return Err(RuntimeError::Redirect(format!(
                "'{}' has no image deployed to a cluster",
                manifest.name
            )));
        };

        let image_ref: ImageRef = image.image_ref.with_tag(&build_tag());
        info!("building {image_ref} for '{}'", manifest.name);
        run(
            ctx,
            "docker",
            [
                OsStr::new("build"),
                OsStr::new("-t"),
                OsStr::new(image_ref.as_str()),
                OsStr::new("-f"),
                image.dockerfile.as_os_str(),
                image.context.as_os_str(),
            ],
        )
        .await?;

        if ctx.is_cancelled() {
            return Err(RuntimeError::Cancelled);
        }
        let applied = run(
            ctx,
            "kubectl",
            [OsStr::new("apply"), OsStr::new("-f"), cluster.yaml.as_os_str()],
        )
        .await?;
        let deployed = parse_applied(&applied);

        let assignment = format!("*={image_ref}");
        run(
            ctx,
            "kubectl",
            [
                OsStr::new("set"),
                OsStr::new("image"),
                OsStr::new("-f"),
                cluster.yaml.as_os_str(),
                OsStr::new(&assignment),
            ],
        )
        .await?;

        // Best effort: only clusters sharing the local daemon expose the container.
        let filter = format!("ancestor={image_ref}");
        let container_id = match run(ctx, "docker", ["ps", "-q", "--filter", filter.as_str()]).await {
            Ok(out) => out.lines().next().map(ContainerId::new),
            Err(e) => {
                debug!("container lookup for {image_ref} failed: {e}");
                None
            }
        };

        Ok(BuildResult {
            image: Some(image_ref),
            container_id,
            deployed,
            files_applied: state.files_changed().to_vec(),
        })
    }
}
