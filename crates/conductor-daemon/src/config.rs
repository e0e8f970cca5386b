//! State-root layout: `~/.conductor` by default, `CONDUCTOR_HOME`
//! overrides it.

use crate::error::{DaemonError, Result};
use std::path::PathBuf;

pub struct StateRoot(PathBuf);

impl StateRoot {
    pub fn resolve() -> Result<Self> {
        if let Ok(path) = std::env::var("CONDUCTOR_HOME") {
            return Ok(Self(PathBuf::from(path)));
        }
        let home = dirs::home_dir().ok_or(DaemonError::NoHomeDirectory)?;
        Ok(Self(home.join(".conductor")))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.0
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.0.join("sessions")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.0.join("uploads")
    }

    pub fn worktrees_file(&self) -> PathBuf {
        self.0.join("worktrees.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.0.join("config.yaml")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.0.join("server.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.0.join("daemon.log")
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.0).await?;
        tokio::fs::create_dir_all(self.sessions_dir()).await?;
        tokio::fs::create_dir_all(self.uploads_dir()).await?;
        Ok(())
    }
}

/// Writes `server.pid` for the current process, refusing if an entry
/// for a still-alive process is already present.
pub async fn write_pid_file(root: &StateRoot) -> Result<()> {
    if let Some(pid) = read_pid_file(root).await {
        if process_alive(pid) {
            return Err(DaemonError::AlreadyRunning(pid));
        }
    }
    tokio::fs::write(root.pid_file(), std::process::id().to_string()).await?;
    Ok(())
}

pub async fn remove_pid_file(root: &StateRoot) {
    let _ = tokio::fs::remove_file(root.pid_file()).await;
}

pub async fn read_pid_file(root: &StateRoot) -> Option<u32> {
    let text = tokio::fs::read_to_string(root.pid_file()).await.ok()?;
    text.trim().parse().ok()
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(windows)]
pub fn process_alive(pid: u32) -> bool {
    use sysinfo::System;
    let system = System::new_all();
    system.process(sysinfo::Pid::from(pid as usize)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pid_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("CONDUCTOR_HOME", dir.path());
        let root = StateRoot::resolve().unwrap();
        write_pid_file(&root).await.unwrap();
        let pid = read_pid_file(&root).await.unwrap();
        assert_eq!(pid, std::process::id());
        remove_pid_file(&root).await;
        assert!(read_pid_file(&root).await.is_none());
        std::env::remove_var("CONDUCTOR_HOME");
    }
}
