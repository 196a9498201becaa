use super::{
    build_order, detect_capabilities, load_config, runtime, spin_done, spinner, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use kiln_runtime::{check_prereqs, format_missing, BackendKind, EnvCapabilities};
use kiln_schema::{ProjectConfig, UpdateMode};
use std::path::Path;

pub fn run(config: &Path, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    let project = if config.exists() {
        match load_config(config) {
            Ok(project) => {
                checks.push(Check::pass(
                    "config",
                    &format!(
                        "{} is valid ({} manifests)",
                        config.display(),
                        project.manifests.len()
                    ),
                ));
                Some(project)
            }
            Err(e) => {
                all_pass = false;
                checks.push(Check::fail("config", &e));
                None
            }
        }
    } else {
        checks.push(Check::info(
            "config",
            &format!("{} not found, checking every tool", config.display()),
        ));
        None
    };

    check_tools(project.as_ref(), &mut checks, &mut all_pass);

    let pb = (!json_output).then(|| spinner("probing environment..."));
    let caps = runtime()?.block_on(detect_capabilities());
    if let Some(pb) = &pb {
        spin_done(pb, "environment probed");
    }

    let update_mode = project
        .as_ref()
        .map_or(UpdateMode::Auto, |p| p.engine.update_mode);
    check_environment(&caps, update_mode, project.as_ref(), &mut checks, &mut all_pass);

    print_results(&checks, all_pass, json_output)
}

fn check_tools(project: Option<&ProjectConfig>, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let (needs_cluster, needs_compose) = project.map_or((true, true), |p| {
        (
            p.manifests.iter().any(|m| m.is_cluster()),
            p.manifests.iter().any(|m| m.is_compose()),
        )
    });
    let missing = check_prereqs(needs_cluster, needs_compose);
    if missing.is_empty() {
        checks.push(Check::pass("tools", "Required tools are installed"));
    } else {
        *all_pass = false;
        checks.push(Check::fail("tools", &format_missing(&missing)));
    }
}

fn check_environment(
    caps: &EnvCapabilities,
    update_mode: UpdateMode,
    project: Option<&ProjectConfig>,
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    if caps.has_cluster() {
        let locality = if caps.cluster.is_local() { "local" } else { "remote" };
        checks.push(Check::pass(
            "cluster",
            &format!("Cluster: {} ({locality})", caps.cluster),
        ));
    } else {
        checks.push(Check::warn("cluster", "No cluster context configured"));
    }
    checks.push(Check::info(
        "container_runtime",
        &format!("Container runtime: {}", caps.runtime),
    ));
    if caps.compose_available {
        checks.push(Check::pass("compose", "docker compose is available"));
    } else {
        checks.push(Check::warn("compose", "docker compose is not available"));
    }

    let kinds = build_order(caps, update_mode).kinds();
    if kinds.is_empty() {
        *all_pass = false;
        checks.push(Check::fail("backends", "No build backend is usable"));
    } else {
        let names: Vec<&str> = kinds.iter().copied().map(BackendKind::as_str).collect();
        checks.push(Check::info(
            "backends",
            &format!("Backends (update mode {update_mode}): {}", names.join(" → ")),
        ));
    }

    let Some(project) = project else {
        return;
    };
    let has = |kind: BackendKind| kinds.contains(&kind);
    for m in &project.manifests {
        let buildable = if m.is_compose() {
            has(BackendKind::ComposeBuild)
        } else {
            has(BackendKind::ImageBuild) || has(BackendKind::LiveUpdate)
        };
        if !buildable {
            *all_pass = false;
            checks.push(Check::fail(
                "manifest_backend",
                &format!(
                    "Manifest '{}' deploys to {} but no backend for it is active",
                    m.name,
                    m.deploy_kind()
                ),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("kiln doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
