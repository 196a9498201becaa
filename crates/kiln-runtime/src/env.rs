//! Detection of the cluster and container runtime kiln deploys into.

use crate::command::probe;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Kind of cluster behind the current kube context.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClusterEnv {
    DockerDesktop,
    Minikube,
    Kind,
    MicroK8s,
    Gke,
    Unknown,
    /// No usable kube context.
    None,
}

impl ClusterEnv {
    pub fn from_context(context: &str) -> Self {
        let context = context.trim();
        match context {
            "" => ClusterEnv::None,
            "docker-desktop" | "docker-for-desktop" => ClusterEnv::DockerDesktop,
            "minikube" => ClusterEnv::Minikube,
            "microk8s" => ClusterEnv::MicroK8s,
            c if c.starts_with("kind-") || c == "kind" => ClusterEnv::Kind,
            c if c.starts_with("gke_") => ClusterEnv::Gke,
            _ => ClusterEnv::Unknown,
        }
    }

    pub fn is_present(self) -> bool {
        self != ClusterEnv::None
    }

    /// Whether the cluster runs on this machine and shares its images.
    pub fn is_local(self) -> bool {
        matches!(
            self,
            ClusterEnv::DockerDesktop | ClusterEnv::Minikube | ClusterEnv::Kind | ClusterEnv::MicroK8s
        )
    }
}

impl fmt::Display for ClusterEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterEnv::DockerDesktop => "docker-desktop",
            ClusterEnv::Minikube => "minikube",
            ClusterEnv::Kind => "kind",
            ClusterEnv::MicroK8s => "microk8s",
            ClusterEnv::Gke => "gke",
            ClusterEnv::Unknown => "unknown",
            ClusterEnv::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerRuntime {
    Docker,
    Containerd,
    CriO,
    Unknown,
}

impl ContainerRuntime {
    /// Parse a node's `containerRuntimeVersion`, e.g. `containerd://1.7.2`.
    pub fn from_version(version: &str) -> Self {
        let scheme = version.split("://").next().unwrap_or_default();
        match scheme.trim() {
            "docker" => ContainerRuntime::Docker,
            "containerd" => ContainerRuntime::Containerd,
            "cri-o" => ContainerRuntime::CriO,
            _ => ContainerRuntime::Unknown,
        }
    }
}

impl fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Containerd => "containerd",
            ContainerRuntime::CriO => "cri-o",
            ContainerRuntime::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What the surrounding environment supports, probed once at startup.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvCapabilities {
    pub cluster: ClusterEnv,
    pub runtime: ContainerRuntime,
    pub compose_available: bool,
}

impl EnvCapabilities {
    /// Probe `kubectl` and `docker`. Missing tools degrade to "absent".
    pub async fn detect() -> Self {
        let context = probe("kubectl", &["config", "current-context"])
            .await
            .unwrap_or_default();
        let cluster = ClusterEnv::from_context(&context);

        let runtime = if cluster.is_present() {
            probe(
                "kubectl",
                &[
                    "get",
                    "nodes",
                    "-o",
                    "jsonpath={.items[0].status.nodeInfo.containerRuntimeVersion}",
                ],
            )
            .await
            .map_or(ContainerRuntime::Unknown, |v| ContainerRuntime::from_version(&v))
        } else if probe("docker", &["version", "--format", "{{.Server.Version}}"])
            .await
            .is_some()
        {
            ContainerRuntime::Docker
        } else {
            ContainerRuntime::Unknown
        };

        let compose_available = probe("docker", &["compose", "version", "--short"])
            .await
            .is_some();

        let caps = EnvCapabilities {
            cluster,
            runtime,
            compose_available,
        };
        debug!(
            "detected cluster={} runtime={} compose={}",
            caps.cluster, caps.runtime, caps.compose_available
        );
        caps
    }

    /// A local docker-desktop cluster with compose, as on a typical laptop.
    pub fn local_docker() -> Self {
        EnvCapabilities {
            cluster: ClusterEnv::DockerDesktop,
            runtime: ContainerRuntime::Docker,
            compose_available: true,
        }
    }

    pub fn has_cluster(&self) -> bool {
        self.cluster.is_present()
    }
}
