//! `conductor` — process-lifecycle CLI for the conductor daemon.
//!
//! Session creation, worktree management, and every other admin verb
//! are the dashboard/transport layer's job (out of scope here); this
//! binary only starts, stops, and inspects the background daemon
//! process.

mod commands;
mod process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use conductor_daemon::logging;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(author, version, about = "Conductor daemon process management", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon
    Start,
    /// Stop the daemon
    Stop,
    /// Restart the daemon
    Restart,
    /// Check daemon status
    Status,
    /// View daemon logs
    Logs {
        /// Follow the log file (like `tail -f`)
        #[arg(short, long)]
        follow: bool,
    },
    /// Internal: run the daemon process in the foreground
    #[clap(hide = true)]
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let is_daemon_run = matches!(
        cli.command,
        Commands::Daemon {
            action: DaemonAction::Run
        }
    );
    if !is_daemon_run {
        logging::init_cli_logging(cli.verbose);
    }

    match cli.command {
        Commands::Daemon { action } => match action {
            DaemonAction::Start => commands::start().await,
            DaemonAction::Stop => commands::stop().await,
            DaemonAction::Restart => commands::restart().await,
            DaemonAction::Status => commands::status().await,
            DaemonAction::Logs { follow } => commands::logs(follow).await,
            DaemonAction::Run => commands::run().await,
        },
    }
}
