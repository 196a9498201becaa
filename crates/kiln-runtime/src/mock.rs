use crate::backend::{BackendKind, BuildBackend, BuildContext};
use crate::RuntimeError;
use async_trait::async_trait;
use kiln_schema::{ContainerId, Manifest, ManifestName};
use kiln_store::{BuildResult, BuildState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

type AcceptFn = dyn Fn(&Manifest, &BuildState) -> bool + Send + Sync;

/// Scripted result of one `execute` call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed(BuildResult),
    Fail(String),
    Redirect(String),
}

/// One recorded `execute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub manifest: ManifestName,
    pub files_changed: Vec<PathBuf>,
    pub first_build: bool,
    pub had_last_result: bool,
}

/// Backend that runs nothing and returns scripted outcomes.
///
/// By default it accepts the same manifests as the real backend of its kind
/// and succeeds with a container named after the manifest.
pub struct MockBackend {
    kind: BackendKind,
    accept: Box<AcceptFn>,
    outcomes: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<MockCall>>,
    gate: Option<Arc<Notify>>,
}

fn default_accept(kind: BackendKind) -> Box<AcceptFn> {
    match kind {
        BackendKind::LiveUpdate => Box::new(|m: &Manifest, s: &BuildState| {
            m.is_cluster() && s.running_container().is_some() && !s.files_changed().is_empty()
        }),
        BackendKind::ImageBuild => Box::new(|m: &Manifest, _: &BuildState| m.is_cluster()),
        BackendKind::ComposeBuild => Box::new(|m: &Manifest, _: &BuildState| m.is_compose()),
    }
}

impl MockBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            accept: default_accept(kind),
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Replace the applicability rule.
    #[must_use]
    pub fn accepting(
        mut self,
        accept: impl Fn(&Manifest, &BuildState) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.accept = Box::new(accept);
        self
    }

    /// Queue outcomes for the next calls; once drained, calls succeed.
    #[must_use]
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.outcomes.lock().extend(outcomes);
        self
    }

    /// Hold every call until `gate` is notified (or the build is cancelled).
    #[must_use]
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn default_result(manifest: &Manifest, state: &BuildState) -> BuildResult {
        BuildResult {
            image: manifest.image.as_ref().map(|i| i.image_ref.with_tag("mock")),
            container_id: Some(ContainerId::new(format!("mock-{}", manifest.name))),
            deployed: vec![format!("{}/{}", manifest.deploy_kind(), manifest.name)],
            files_applied: state.files_changed().to_vec(),
        }
    }
}

#[async_trait]
impl BuildBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn can_handle(&self, manifest: &Manifest, state: &BuildState) -> bool {
        (self.accept)(manifest, state)
    }

    async fn execute(
        &self,
        ctx: &BuildContext,
        manifest: &Manifest,
        state: &BuildState,
    ) -> Result<BuildResult, RuntimeError> {
        self.calls.lock().push(MockCall {
            manifest: manifest.name.clone(),
            files_changed: state.files_changed().to_vec(),
            first_build: state.is_first_build(),
            had_last_result: state.last_result().is_some(),
        });
        ctx.log(format!("mock {} building {}", self.kind, manifest.name));

        if let Some(gate) = &self.gate {
            tokio::select! {
                () = gate.notified() => {}
                () = ctx.cancel_token().cancelled() => return Err(RuntimeError::Cancelled),
            }
        }

        let outcome = self.outcomes.lock().pop_front();
        match outcome {
            None => Ok(Self::default_result(manifest, state)),
            Some(MockOutcome::Succeed(result)) => Ok(result),
            Some(MockOutcome::Fail(msg)) => Err(RuntimeError::ExecFailed(msg)),
            Some(MockOutcome::Redirect(msg)) => Err(RuntimeError::Redirect(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::{ComposeTarget, DeployTarget, TriggerMode};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn compose_manifest() -> Manifest {
        Manifest {
            name: ManifestName::from("db"),
            trigger_mode: TriggerMode::Auto,
            image: None,
            deploy: DeployTarget::Compose(ComposeTarget {
                file: PathBuf::from("/p/docker-compose.yml"),
                service: "db".to_owned(),
            }),
            watch_paths: Vec::new(),
            config_files: Vec::new(),
        }
    }

    fn ctx() -> BuildContext {
        BuildContext::detached(CancellationToken::new())
    }

    #[tokio::test]
    async fn default_success_and_call_recording() {
        let backend = MockBackend::new(BackendKind::ComposeBuild);
        let state = BuildState::new(None, vec![PathBuf::from("/p/b"), PathBuf::from("/p/a")], true);

        let result = backend.execute(&ctx(), &compose_manifest(), &state).await.unwrap();
        assert_eq!(result.container_id.unwrap().as_str(), "mock-db");
        assert_eq!(result.deployed, vec!["compose/db"]);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].files_changed, vec![PathBuf::from("/p/a"), PathBuf::from("/p/b")]);
        assert!(calls[0].first_build);
        assert!(!calls[0].had_last_result);
    }

    #[tokio::test]
    async fn scripted_outcomes_are_consumed_in_order() {
        let backend = MockBackend::new(BackendKind::ComposeBuild).with_outcomes([
            MockOutcome::Fail("exit 1".to_owned()),
            MockOutcome::Redirect("gone".to_owned()),
        ]);
        let m = compose_manifest();
        let state = BuildState::clean();

        assert!(matches!(
            backend.execute(&ctx(), &m, &state).await,
            Err(RuntimeError::ExecFailed(msg)) if msg == "exit 1"
        ));
        assert!(backend.execute(&ctx(), &m, &state).await.unwrap_err().is_redirect());
        assert!(backend.execute(&ctx(), &m, &state).await.is_ok());
        assert_eq!(backend.call_count(), 3);
    }

    #[test]
    fn default_acceptance_follows_kind() {
        let m = compose_manifest();
        let state = BuildState::clean();
        assert!(MockBackend::new(BackendKind::ComposeBuild).can_handle(&m, &state));
        assert!(!MockBackend::new(BackendKind::ImageBuild).can_handle(&m, &state));
        assert!(!MockBackend::new(BackendKind::LiveUpdate).can_handle(&m, &state));
        assert!(!MockBackend::new(BackendKind::ComposeBuild)
            .accepting(|_, _| false)
            .can_handle(&m, &state));
    }

    #[tokio::test]
    async fn gate_holds_until_notified() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(MockBackend::new(BackendKind::ComposeBuild).gated(gate.clone()));

        let task = {
            let backend = backend.clone();
            tokio::spawn(async move {
                backend
                    .execute(&ctx(), &compose_manifest(), &BuildState::clean())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        gate.notify_one();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn gate_honours_cancellation() {
        let gate = Arc::new(Notify::new());
        let backend = MockBackend::new(BackendKind::ComposeBuild).gated(gate);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = backend
            .execute(
                &BuildContext::detached(cancel),
                &compose_manifest(),
                &BuildState::clean(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled));
    }
}
