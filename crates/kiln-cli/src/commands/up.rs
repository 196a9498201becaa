use super::{
    build_order, detect_capabilities, json_pretty, load_config, runtime, skip_prereqs,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use console::Style;
use kiln_core::{install_signal_handler, shutdown_requested, CompositeBuildAndDeployer, Engine};
use kiln_runtime::{check_prereqs, format_missing};
use kiln_schema::{ConfigFileSource, Manifest, ManifestName, UpdateMode};
use kiln_store::{Action, EngineState, ManifestStatus, Store, Subscriber};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub fn run(
    config: &Path,
    update_mode: Option<UpdateMode>,
    once: bool,
    json: bool,
) -> Result<u8, String> {
    let rt = runtime()?;
    let result = rt.block_on(up(config, update_mode, once, json));
    // The stdin reader may still be parked in a blocking read.
    rt.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn up(
    config: &Path,
    update_mode: Option<UpdateMode>,
    once: bool,
    json: bool,
) -> Result<u8, String> {
    let mut project = load_config(config)?;
    if let Some(mode) = update_mode {
        project.engine.update_mode = mode;
    }

    if !skip_prereqs() {
        let needs_cluster = project.manifests.iter().any(Manifest::is_cluster);
        let needs_compose = project.manifests.iter().any(Manifest::is_compose);
        let missing = check_prereqs(needs_cluster, needs_compose);
        if !missing.is_empty() {
            return Err(format_missing(&missing));
        }
    }

    let caps = detect_capabilities().await;
    let order = build_order(&caps, project.engine.update_mode);
    if order.is_empty() {
        return Err("no build backend is usable here; run `kiln doctor` for details".to_owned());
    }
    let bd = Arc::new(CompositeBuildAndDeployer::new(order));

    let root = config
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let cancel = CancellationToken::new();
    install_signal_handler(cancel.clone());

    let expected = project.manifests.len();
    let source = Arc::new(ConfigFileSource::new(config));
    let mut engine =
        Engine::new(project, bd, source, cancel.clone()).with_display_root(root.clone());
    if !json {
        engine.add_subscriber(Box::new(LogPrinter::default()));
    }
    let store = engine.store().clone();
    let engine_task = tokio::spawn(engine.run());

    tokio::spawn(read_commands(store.clone(), root, cancel.clone()));
    if once {
        tokio::spawn(cancel_when_settled(store, expected, cancel));
    }

    let state = engine_task
        .await
        .map_err(|e| format!("engine task failed: {e}"))?
        .map_err(|e| e.to_string())?;

    let interrupted = shutdown_requested();
    if json {
        println!("{}", json_pretty(&state)?);
    } else {
        print_summary(&state);
        if once && interrupted {
            println!("\n  interrupted before every manifest settled");
        }
    }

    // An interrupted --once run did not finish its builds.
    let failed = interrupted
        || state
            .manifests()
            .any(|ms| matches!(ms.status(), ManifestStatus::Error | ManifestStatus::ConfigError));
    Ok(if once && failed {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}

/// Prints every new log line, prefixed with its manifest.
#[derive(Default)]
struct LogPrinter {
    last_seq: u64,
}

impl Subscriber for LogPrinter {
    fn name(&self) -> &str {
        "log-printer"
    }

    fn on_change(&mut self, store: &Store) {
        let state = store.read_state();
        let dim = Style::new().dim();
        for line in state.log.since(self.last_seq) {
            match &line.manifest {
                Some(name) => println!("{} │ {}", dim.apply_to(format!("{name:>12}")), line.text),
                None => println!("{}", line.text),
            }
        }
        self.last_seq = state.log.last_seq();
    }
}

fn print_summary(state: &EngineState) {
    println!();
    for ms in state.manifests() {
        let last = ms.last_build().map_or_else(String::new, |b| {
            let took = b
                .duration()
                .map_or_else(String::new, |d| format!(" in {}ms", d.num_milliseconds()));
            format!(" ({}{took})", b.reason)
        });
        println!(
            "  {:<16} {}{last}",
            ms.name(),
            super::colorize_status(&ms.status().to_string())
        );
        let error = ms
            .config_error
            .as_deref()
            .or_else(|| ms.last_build().and_then(|b| b.error.as_deref()));
        if let Some(err) = error {
            println!("  {:<16} {err}", "");
        }
    }
}

/// A request typed on stdin while `up` runs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StdinCommand {
    Trigger(ManifestName),
    Changed(PathBuf),
    Reload,
    Quit,
}

fn parse_command(line: &str, root: &Path) -> Option<StdinCommand> {
    let mut words = line.split_whitespace();
    let first = words.next()?;
    let rest = words.next();
    let command = match (first, rest) {
        ("quit" | "exit", None) => StdinCommand::Quit,
        ("reload", None) => StdinCommand::Reload,
        ("changed", Some(path)) => StdinCommand::Changed(root.join(path)),
        ("trigger", Some(name)) => StdinCommand::Trigger(ManifestName::from(name)),
        (name, None) => StdinCommand::Trigger(ManifestName::from(name)),
        _ => return None,
    };
    if words.next().is_some() {
        return None;
    }
    Some(command)
}

async fn read_commands(store: Store, root: PathBuf, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, no more commands");
                return;
            }
            Err(e) => {
                warn!("reading stdin failed: {e}");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line, &root) else {
            eprintln!("unrecognized command: {}", line.trim());
            continue;
        };
        let action = match command {
            StdinCommand::Quit => {
                cancel.cancel();
                return;
            }
            StdinCommand::Trigger(name) => Action::ManualTrigger { name },
            StdinCommand::Changed(path) => Action::file_changed(path),
            StdinCommand::Reload => {
                let manifests = {
                    let state = store.read_state();
                    state.manifest_states.keys().cloned().collect()
                };
                Action::ConfigChanged { manifests }
            }
        };
        if store.dispatch(action).await.is_err() {
            return;
        }
    }
}

/// All `expected` manifests are defined, each has finished at least one
/// attempt, and nothing is queued.
fn all_settled(state: &EngineState, expected: usize) -> bool {
    state.definition_order.len() >= expected
        && state.currently_building.is_none()
        && state.manifests_to_build.is_empty()
        && state
            .manifests()
            .all(|ms| ms.has_been_built || ms.config_error.is_some())
}

async fn cancel_when_settled(store: Store, expected: usize, cancel: CancellationToken) {
    let mut changes = store.changes();
    loop {
        let settled = all_settled(&store.read_state(), expected);
        if settled {
            debug!("all manifests settled, stopping");
            cancel.cancel();
            return;
        }
        tokio::select! {
            () = cancel.cancelled() => return,
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
