//! `conductor daemon <action>` implementations: thin `println!`-driven
//! wrappers around process lifecycle plus the one real workhorse,
//! `run`, which is what actually runs as the backgrounded process.

use crate::process::DaemonProcess;
use anyhow::{Context, Result};
use colored::Colorize;
use conductor_daemon::{logging, Daemon};

pub async fn start() -> Result<()> {
    println!("{}", "Starting conductor daemon...".blue());
    let process = DaemonProcess;

    if process.is_running().await? {
        println!("{}", "Daemon is already running".green());
        return Ok(());
    }

    process.start().await.context("failed to start daemon")?;
    println!("{}", "Daemon started".green());
    Ok(())
}

pub async fn stop() -> Result<()> {
    println!("{}", "Stopping conductor daemon...".blue());
    let process = DaemonProcess;

    if !process.is_running().await? {
        println!("{}", "Daemon is not running".yellow());
        return Ok(());
    }

    process.stop().await.context("failed to stop daemon")?;
    println!("{}", "Daemon stopped".green());
    Ok(())
}

pub async fn restart() -> Result<()> {
    let process = DaemonProcess;
    if process.is_running().await? {
        process.stop().await?;
    }
    process.start().await.context("failed to restart daemon")?;
    println!("{}", "Daemon restarted".green());
    Ok(())
}

pub async fn status() -> Result<()> {
    let process = DaemonProcess;
    if process.is_running().await? {
        println!("{}", "Daemon is running".green());
    } else {
        println!("{}", "Daemon is not running".yellow());
    }
    Ok(())
}

pub async fn logs(follow: bool) -> Result<()> {
    let root = conductor_daemon::StateRoot::resolve()?;
    let log_path = root.log_file();

    if !log_path.exists() {
        println!("{}", "No log file found".yellow());
        return Ok(());
    }

    if follow {
        println!("{}", "Following daemon logs (Ctrl+C to exit)...".blue());
        let mut child = tokio::process::Command::new("tail")
            .arg("-f")
            .arg(&log_path)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit())
            .spawn()?;
        child.wait().await?;
    } else {
        let content = tokio::fs::read_to_string(&log_path).await?;
        print!("{content}");
    }
    Ok(())
}

/// The actual daemon process entry point: bootstraps every component,
/// claims the PID file, and blocks until a shutdown signal arrives.
pub async fn run() -> Result<()> {
    let daemon = Daemon::run_as_process().await.context("failed to start daemon")?;
    let _log_guard = logging::init_daemon_logging(daemon.state_root())?;

    tracing::info!("conductor daemon started, state root {:?}", daemon.state_root().path());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = wait_for_sigterm() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    daemon.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(windows)]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
