//! Ferry CLI
//!
//! Runs batches of three-phase tasks between isolates, for smoke testing
//! and for watching the protocol in the logs (`FERRY_LOG=ferry::task=trace`).

use clap::{Parser, Subcommand};
use ferry_cli::commands::run;
use ferry_cli::{CliConfig, RunOverrides};
use ferry_task::RunMode;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Three-phase tasks across isolates", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless FERRY_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of tasks from one origin isolate into target isolates
    Run {
        /// Delivery mode: sync, async or ignored
        #[arg(short, long)]
        mode: Option<RunMode>,
        /// Number of tasks
        #[arg(short = 'n', long)]
        tasks: Option<usize>,
        /// Number of target isolates (0 = one per CPU)
        #[arg(short, long)]
        targets: Option<usize>,
        /// Numbers summed per task
        #[arg(long)]
        batch: Option<usize>,
        /// Make every Nth task fail in its target
        #[arg(long)]
        fail_every: Option<usize>,
        /// Wait limit for results, in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("FERRY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = CliConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            mode,
            tasks,
            targets,
            batch,
            fail_every,
            timeout_ms,
            json,
        } => {
            RunOverrides {
                mode,
                tasks,
                targets,
                batch,
                fail_every,
                timeout_ms,
            }
            .apply(&mut config.run);

            let report = run::execute(&config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.render());
            }
            if report.mismatches > 0 {
                anyhow::bail!("{} task(s) returned a wrong sum", report.mismatches);
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
