//! # attendo
//!
//! Operator console for ZKTeco fingerprint terminals.
//!
//! ## Commands
//!
//! - `init`: Create the database and write a default config file
//! - `device`: Register, list, edit, delete and check terminals
//! - `user`: Manage the local user list
//! - `attendance`: List stored attendance records
//! - `terminal`: Talk to one terminal directly (users, punches, enrolment)
//! - `sync`: Pull users and attendance from every registered terminal
//! - `summary`: Show device reachability and the local user count
//!
//! ## Example
//!
//! ```bash
//! # Create the database and config
//! attendo init
//!
//! # Register a terminal
//! attendo device add --name "Front door" --model K40 --serial SN001 --ip 10.0.0.5
//!
//! # Pull everything from every terminal
//! attendo sync
//!
//! # Verbose logs
//! RUST_LOG=attendo=trace attendo sync
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use attendo_sync::AttendoConfig;

mod commands;
mod context;
mod output;
mod progress;

use commands::attendance::AttendanceCommand;
use commands::device::DeviceCommand;
use commands::terminal::TerminalCommand;
use commands::user::UserCommand;
use commands::{attendance, device, init, summary, sync, terminal, user};
use context::Console;

/// Operator console for ZKTeco fingerprint terminals.
#[derive(Parser, Debug)]
#[command(name = "attendo")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and write a default config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Manage registered terminals
    #[command(subcommand)]
    Device(DeviceCommand),

    /// Manage the local user list
    #[command(subcommand)]
    User(UserCommand),

    /// Inspect stored attendance
    #[command(subcommand)]
    Attendance(AttendanceCommand),

    /// Operate on one terminal directly
    #[command(subcommand)]
    Terminal(TerminalCommand),

    /// Pull users and attendance from every registered terminal
    Sync,

    /// Show device reachability and the local user count
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    let config = AttendoConfig::load(cli.config.clone()).context("Failed to load configuration")?;

    if let Commands::Init { force } = cli.command {
        return init::run(&config, cli.config, force).await;
    }

    let console = Console::open(config, cli.json).await?;

    let succeeded = match cli.command {
        // Handled before the database is opened
        Commands::Init { .. } => true,
        Commands::Device(cmd) => device::run(&console, cmd).await.map(|_| true)?,
        Commands::User(cmd) => user::run(&console, cmd).await.map(|_| true)?,
        Commands::Attendance(cmd) => attendance::run(&console, cmd).await.map(|_| true)?,
        Commands::Terminal(cmd) => terminal::run(&console, cmd).await.map(|_| true)?,
        Commands::Sync => sync::run(&console).await?,
        Commands::Summary => summary::run(&console).await.map(|_| true)?,
    };

    console.close().await;

    if !succeeded {
        std::process::exit(1);
    }

    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG` wins when set
/// - Otherwise: info globally, debug for attendo crates, warn for sqlx
///
/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,attendo=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("attendo console v{}", env!("CARGO_PKG_VERSION"));
}
