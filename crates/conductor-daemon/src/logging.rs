//! Rolling file logging for the daemon process: `tracing_appender`
//! non-blocking writer, no ANSI codes (the log file isn't a terminal),
//! file+line for debugging a backgrounded process.

use crate::config::StateRoot;
use tracing_appender::non_blocking::WorkerGuard;

/// Initializes the global `tracing` subscriber to write to
/// `<state_root>/daemon.log`. The returned guard must be held for the
/// lifetime of the process — dropping it stops the background flush
/// thread and truncates in-flight log lines.
pub fn init_daemon_logging(state_root: &StateRoot) -> anyhow::Result<WorkerGuard> {
    let log_path = state_root.log_file();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        log_path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        log_path.file_name().unwrap_or_else(|| std::ffi::OsStr::new("daemon.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("CONDUCTOR_LOG").unwrap_or_else(|_| "conductor_daemon=info,conductor_registry=info,conductor_worktree=info,conductor_core=info".to_string()),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(guard)
}

/// Initializes a plain stdout subscriber for foreground/CLI use, where
/// a rolling file log would be surprising.
pub fn init_cli_logging(verbose: bool) {
    let filter = if verbose {
        "conductor_daemon=debug,conductor_registry=debug,conductor_worktree=debug,conductor_core=debug"
    } else {
        "conductor_daemon=info,conductor_cli=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
