//! Stepwise CLI — the main entry point.
//!
//! Commands:
//! - `run`     — Run a task through the iteration engine
//! - `tools`   — List the built-in tools
//! - `config`  — Show or initialize the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stepwise_config::{AppConfig, LoggingConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

mod commands;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise — a tool-using agent that works a task one iteration at a time",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task and print progress as it happens
    Run {
        /// The task for the agent
        task: String,

        /// Override the iteration cap from the config
        #[arg(short = 'n', long)]
        max_iterations: Option<usize>,

        /// Write the run transcript as JSON to this path
        #[arg(short, long)]
        export: Option<PathBuf>,

        /// Replay model answers from a JSON script instead of calling a model
        #[arg(long, env = "STEPWISE_SCRIPT")]
        script: Option<PathBuf>,
    },

    /// List the available tools
    Tools {
        /// Print the manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write the default config file
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,

        /// Only print the config file path
        #[arg(long, conflicts_with = "init")]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // A broken config file must not prevent `config --init --force`.
    let config = with_startup_logging(
        log_filter(cli.verbose, None),
        cli.log_json,
        std::io::stderr,
        AppConfig::load,
    );
    init_tracing(
        cli.verbose,
        cli.log_json,
        config.as_ref().ok().map(|c| &c.logging),
    );

    match cli.command {
        Commands::Run {
            task,
            max_iterations,
            export,
            script,
        } => {
            let config = config.map_err(|e| format!("Failed to load config: {e}"))?;
            commands::run::run(
                &config,
                commands::run::RunArgs {
                    task,
                    max_iterations,
                    export,
                    script,
                },
            )
            .await?
        }
        Commands::Tools { json } => commands::tools::run(json)?,
        Commands::Config { init, force, path } => {
            if path {
                commands::config_cmd::path();
            } else if init {
                commands::config_cmd::init(force)?;
            } else {
                let config = config.map_err(|e| format!("Failed to load config: {e}"))?;
                commands::config_cmd::show(&config);
            }
        }
    }

    Ok(())
}

fn log_filter(verbose: bool, logging: Option<&LoggingConfig>) -> EnvFilter {
    let level = if verbose {
        "debug"
    } else {
        logging.map(|l| l.level.as_str()).unwrap_or("info")
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Run `f` under a scoped subscriber, for work that happens before the
/// config (and so the configured log level) is known.
fn with_startup_logging<W, T>(
    filter: EnvFilter,
    json: bool,
    writer: W,
    f: impl FnOnce() -> T,
) -> T
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer);

    if json {
        tracing::subscriber::with_default(builder.json().finish(), f)
    } else {
        tracing::subscriber::with_default(builder.finish(), f)
    }
}

/// Logs go to stderr so stdout only carries run output.
fn init_tracing(verbose: bool, json: bool, logging: Option<&LoggingConfig>) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(verbose, logging))
        .with_target(false)
        .with_writer(std::io::stderr);

    if json || logging.is_some_and(|l| l.json) {
        builder.json().init();
    } else {
        builder.init();
    }
}
