//! Blocking `git` subprocess invocation, dispatched off the event loop.
//!
//! The manager never shells out directly from an `async fn` body — every
//! call goes through [`git`], which runs `std::process::Command` inside
//! `spawn_blocking` so a slow repository (cold fetch, large diff) never
//! stalls the single-threaded session bookkeeping described in §5.

use crate::error::{Result, WorktreeError};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// The captured result of one `git` invocation. Callers decide whether a
/// non-zero exit is an error (most are) or an expected outcome to branch
/// on (e.g. `rev-parse --verify` during branch-collision probing).
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

fn run_sync(cwd: &Path, args: &[String]) -> Result<GitOutput> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| WorktreeError::Git(format!("failed to spawn git {args:?}: {e}")))?;
    Ok(GitOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs `git <args>` in `cwd` on the blocking thread pool, with a 30s
/// timeout.
pub async fn git(cwd: impl Into<PathBuf>, args: Vec<String>) -> Result<GitOutput> {
    let cwd = cwd.into();
    let handle = tokio::task::spawn_blocking(move || run_sync(&cwd, &args));
    match tokio::time::timeout(GIT_TIMEOUT, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(WorktreeError::Git(format!("git task panicked: {join_err}"))),
        Err(_) => Err(WorktreeError::Git("git command timed out after 30s".to_string())),
    }
}

/// Runs `git <args>` and requires a zero exit, returning trimmed stdout.
pub async fn git_checked(cwd: impl Into<PathBuf>, args: Vec<String>) -> Result<String> {
    let cwd = cwd.into();
    let rendered = args.join(" ");
    let output = git(cwd, args).await?;
    if output.success() {
        Ok(output.stdout.trim().to_string())
    } else {
        Err(WorktreeError::Git(format!(
            "`git {rendered}` failed: {}",
            output.stderr.trim()
        )))
    }
}

/// Convenience for building an owned argument vector from string literals.
pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
