use crate::backend::{BackendKind, BuildBackend, BuildContext};
use crate::command::run;
use crate::RuntimeError;
use async_trait::async_trait;
use kiln_schema::{ContainerId, ImageTarget, Manifest};
use kiln_store::{BuildResult, BuildState};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tracing::info;

/// Updates a running container in place: copies changed files in according
/// to the manifest's sync rules, then restarts it.
#[derive(Debug, Default)]
pub struct LiveUpdateBackend;

impl LiveUpdateBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Container destinations for every changed file, or `None` if any file is
/// outside all sync rules.
fn plan(image: &ImageTarget, files: &[PathBuf]) -> Option<Vec<(PathBuf, PathBuf)>> {
    files
        .iter()
        .map(|f| image.sync_target(f).map(|dest| (f.clone(), dest)))
        .collect()
}

fn is_missing_container(err: &RuntimeError) -> bool {
    match err {
        RuntimeError::CommandFailed { stderr, .. } => {
            stderr.contains("No such container") || stderr.contains("is not running")
        }
        _ => false,
    }
}

/// A vanished container means the deployment moved on; let the next backend
/// rebuild it.
fn redirect_if_gone(err: RuntimeError, container: &ContainerId) -> RuntimeError {
    if is_missing_container(&err) {
        RuntimeError::Redirect(format!("container {container} is gone"))
    } else {
        err
    }
}

async fn copy_in(
    ctx: &BuildContext,
    container: &ContainerId,
    local: &Path,
    dest: &Path,
) -> Result<(), RuntimeError> {
    let outcome = if local.exists() {
        let target = OsString::from(format!("{container}:{}", dest.display()));
        run(ctx, "docker", [OsStr::new("cp"), local.as_os_str(), target.as_os_str()]).await
    } else {
        let args = [
            OsStr::new("exec"),
            OsStr::new(container.as_str()),
            OsStr::new("rm"),
            OsStr::new("-rf"),
            dest.as_os_str(),
        ];
        run(ctx, "docker", args).await
    };
    outcome
        .map(drop)
        .map_err(|e| redirect_if_gone(e, container))
}

#[async_trait]
impl BuildBackend for LiveUpdateBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LiveUpdate
    }

    fn can_handle(&self, manifest: &Manifest, state: &BuildState) -> bool {
        let Some(image) = &manifest.image else {
            return false;
        };
        manifest.is_cluster()
            && !image.sync.is_empty()
            && state.running_container().is_some()
            && !state.files_changed().is_empty()
            && plan(image, state.files_changed()).is_some()
    }

    async fn execute(
        &self,
        ctx: &BuildContext,
        manifest: &Manifest,
        state: &BuildState,
    ) -> Result<BuildResult, RuntimeError> {
        let (Some(image), Some(container), Some(last)) =
            (&manifest.image, state.running_container(), state.last_result())
        else {
            return Err(RuntimeError::Redirect(
                "no running container to update".to_owned(),
            ));
        };
        let Some(copies) = plan(image, state.files_changed()) else {
            return Err(RuntimeError::Redirect(
                "changed files outside sync rules".to_owned(),
            ));
        };

        info!(
            "live-updating {} file(s) in {container} for '{}'",
            copies.len(),
            manifest.name
        );
        for (local, dest) in &copies {
            if ctx.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            copy_in(ctx, container, local, dest).await?;
        }
        run(ctx, "docker", ["restart", container.as_str()])
            .await
            .map_err(|e| redirect_if_gone(e, container))?;

        Ok(BuildResult {
            image: last.image.clone(),
            container_id: Some(container.clone()),
            deployed: last.deployed.clone(),
            files_applied: copies.into_iter().map(|(local, _)| local).collect(),
        })
    }
}
