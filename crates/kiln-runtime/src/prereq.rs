use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn compose_plugin_works() -> bool {
    Command::new("docker")
        .args(["compose", "version"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools the configured manifests need.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_prereqs(needs_cluster: bool, needs_compose: bool) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("docker") {
        missing.push(MissingPrereq {
            name: "docker",
            purpose: "building images and updating containers",
            install_hint: "https://docs.docker.com/engine/install/",
        });
    } else if needs_compose && !compose_plugin_works() {
        missing.push(MissingPrereq {
            name: "docker compose",
            purpose: "deploying compose services",
            install_hint: "install the docker-compose-plugin package",
        });
    }

    if needs_cluster && !command_exists("kubectl") {
        missing.push(MissingPrereq {
            name: "kubectl",
            purpose: "applying cluster objects",
            install_hint: "https://kubernetes.io/docs/tasks/tools/",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nkiln drives these tools to build and deploy manifests.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "kubectl",
            purpose: "applying cluster objects",
            install_hint: "brew install kubectl",
        };
        let s = format!("{m}");
        assert!(s.contains("kubectl"));
        assert!(s.contains("applying cluster objects"));
        assert!(s.contains("brew install kubectl"));
    }

    #[test]
    fn format_missing_lists_every_item() {
        let items = vec![
            MissingPrereq {
                name: "docker",
                purpose: "images",
                install_hint: "apt install docker.io",
            },
            MissingPrereq {
                name: "kubectl",
                purpose: "deploys",
                install_hint: "apt install kubectl",
            },
        ];
        let output = format_missing(&items);
        assert!(output.starts_with("missing prerequisites:"));
        assert!(output.contains("  - docker: images"));
        assert!(output.contains("  - kubectl: deploys"));
    }

    #[test]
    fn nothing_needed_beyond_docker() {
        let missing = check_prereqs(false, false);
        assert!(missing.iter().all(|m| m.name == "docker"));
    }
}
