mod commands;

use clap::{Parser, Subcommand};
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE};
use kiln_schema::UpdateMode;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Rebuild and redeploy services as their sources change"
)]
struct Cli {
    /// Path to the project config file.
    #[arg(long, short, default_value = "kiln.toml", global = true)]
    config: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build every manifest, then rebuild as changes arrive until Ctrl-C.
    ///
    /// Lines on stdin drive the loop: a manifest name (or `trigger <name>`)
    /// requests a build, `changed <path>` reports a file change, `reload`
    /// re-reads every definition and `quit` stops.
    Up {
        /// Override the config's update mode (auto, image, container).
        #[arg(long)]
        update_mode: Option<UpdateMode>,
        /// Stop once every manifest has been built; fail if any build failed.
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Parse the config and list its manifests.
    Validate,
    /// Report the detected environment, active backends and missing tools.
    Doctor,
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Up { update_mode, once } => {
            commands::up::run(&cli.config, update_mode, once, cli.json)
        }
        Commands::Validate => commands::validate::run(&cli.config, cli.json),
        Commands::Doctor => commands::doctor::run(&cli.config, cli.json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
