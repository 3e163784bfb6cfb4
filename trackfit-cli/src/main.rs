//! trackfit CLI: runs tracked fits and inspects the local run store.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// trackfit: experiment tracking for training loops
#[derive(Parser, Debug)]
#[command(name = "trackfit", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Project to log to (overrides configuration)
    #[arg(short, long)]
    project: Option<String>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Run a synthetic fit with the tracker callback attached
    Simulate(SimulateArgs),
    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct SimulateArgs {
    /// Number of epochs
    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    /// Training batches per epoch
    #[arg(long, default_value_t = 20)]
    pub batches: usize,

    /// Validation batches per epoch
    #[arg(long, default_value_t = 5)]
    pub valid_batches: usize,

    /// Run name (defaults to the configured run name, then a generated one)
    #[arg(long)]
    pub name: Option<String>,

    /// Continue logging to a run that was left running
    #[arg(long, conflicts_with = "name")]
    pub resume: Option<String>,

    /// Write a separate checkpoint file per epoch
    #[arg(long)]
    pub every_epoch: bool,

    /// Do not attach a checkpoint saver
    #[arg(long)]
    pub no_checkpoints: bool,

    /// Do not upload checkpoints
    #[arg(long)]
    pub no_weights: bool,

    /// Leave the run open when the fit ends
    #[arg(long)]
    pub keep_running: bool,

    /// Seed for the synthetic loss noise
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum RunsAction {
    /// List runs of the project
    List,
    /// Show one run
    Show {
        /// Run id
        id: String,
        /// Print the full run record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Write a default workspace configuration file
    Init,
    /// Show the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "trackfit", "trackfit")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "trackfit.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.project.as_deref())
}
