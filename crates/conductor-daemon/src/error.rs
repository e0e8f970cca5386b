use thiserror::Error;

/// Errors raised while wiring or driving the daemon itself — state-root
/// setup, PID-file bookkeeping, and the thin admin-interface adapters.
/// Everything the registry/worktree crates raise passes through
/// unchanged; callers at the binary seam convert to `anyhow::Error`.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("could not determine home directory")]
    NoHomeDirectory,

    #[error("a daemon is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error(transparent)]
    Core(#[from] conductor_core::CoreError),

    #[error(transparent)]
    Registry(#[from] conductor_registry::RegistryError),

    #[error(transparent)]
    Worktree(#[from] conductor_worktree::WorktreeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
