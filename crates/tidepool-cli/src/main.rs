//! Tidepool CLI - Command-line interface for the Tidepool sync engine
//!
//! Provides commands for:
//! - Running sync passes against the backend
//! - Inspecting sync, queue and cache state
//! - Listing and discovering tables
//! - Managing the offline request queue
//! - Viewing and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod output;

use app::App;
use commands::{
    config::ConfigCommand, queue::QueueCommand, status::StatusCommand, sync::SyncCommand,
    tables::TablesCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "tidepool",
    version,
    about = "Offline-first sync between a local database and a REST backend"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Push pending local changes and pull remote rows
    Sync(SyncCommand),
    /// Show local, queue and cache status
    Status(StatusCommand),
    /// List syncable tables
    Tables(TablesCommand),
    /// Manage the offline request queue
    #[command(subcommand)]
    Queue(QueueCommand),
    /// View and manage configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn init_tracing(verbose: u8, app: &App) {
    let level = match verbose {
        0 => app.config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so `--json` output on stdout stays parseable
    if app.config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = App::load(cli.config);
    init_tracing(cli.verbose, &app);

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Sync(cmd) => cmd.execute(&app, format).await,
        Commands::Status(cmd) => cmd.execute(&app, format).await,
        Commands::Tables(cmd) => cmd.execute(&app, format).await,
        Commands::Queue(cmd) => cmd.execute(&app, format).await,
        Commands::Config(cmd) => cmd.execute(&app, format).await,
    }
}
