//! Spawns/stops the backgrounded `conductor daemon run` process.
//!
//! The PID file is the single source of truth for "is a daemon
//! running", and `start` re-execs the current binary with `daemon run`
//! rather than forking, so `cargo install`/`cargo run` binaries behave
//! the same either way.

use anyhow::{Context, Result};
use conductor_daemon::config::{self, StateRoot};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub struct DaemonProcess;

impl DaemonProcess {
    pub async fn is_running(&self) -> Result<bool> {
        let root = StateRoot::resolve()?;
        match config::read_pid_file(&root).await {
            Some(pid) => Ok(config::process_alive(pid)),
            None => Ok(false),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let root = StateRoot::resolve()?;
        root.ensure_dirs().await?;

        let current_exe = std::env::current_exe().context("failed to resolve current executable")?;
        let mut cmd = Command::new(current_exe);
        cmd.arg("daemon")
            .arg("run")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .current_dir(root.path());

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.spawn().context("failed to spawn daemon process")?;

        // Give the child a moment to claim the PID file before we
        // report success.
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let root = StateRoot::resolve()?;
        if let Some(pid) = config::read_pid_file(&root).await {
            terminate(pid);
        }
        config::remove_pid_file(&root).await;
        Ok(())
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(windows)]
fn terminate(pid: u32) {
    use sysinfo::System;
    let mut system = System::new_all();
    system.refresh_all();
    if let Some(process) = system.process(sysinfo::Pid::from(pid as usize)) {
        process.kill();
    }
}
