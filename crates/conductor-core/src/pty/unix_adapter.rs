use super::{build_child_env, PtyAdapter, PtySizeSpec, SpawnSpec};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{Child, CommandBuilder, NativePtySystem, PtySize, PtySystem};
use std::io::{Read, Write};
use tokio::sync::mpsc;

const READ_CHUNK: usize = 64 * 1024;

/// Unix PTY adapter: a master/slave pair from `portable-pty`, a
/// dedicated blocking reader thread feeding a channel the async
/// engine can poll without blocking, and `killpg` for hard stop since
/// the child is its own process-group leader.
pub struct UnixPtyAdapter {
    master: Box<dyn portable_pty::MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    read_rx: mpsc::Receiver<Vec<u8>>,
    pid: Option<u32>,
}

impl UnixPtyAdapter {
    pub fn spawn(spec: SpawnSpec) -> Result<Self> {
        let pty_system = NativePtySystem::default();
        let size = PtySize {
            rows: spec.size.rows,
            cols: spec.size.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pair = pty_system
            .openpty(size)
            .map_err(|e| CoreError::Other(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new("/bin/sh");
        cmd.arg("-c");
        cmd.arg(&spec.command);
        cmd.cwd(&spec.cwd);
        let env = build_child_env(&spec.env);
        for (k, v) in &env {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CoreError::Spawn {
                command: spec.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
            })?;
        let pid = child.process_id();

        // The slave end is only needed to spawn; drop it so the
        // master sees EOF once the child's own copy closes too.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CoreError::Other(format!("clone pty reader failed: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CoreError::Other(format!("take pty writer failed: {e}")))?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(256);
        std::thread::spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            master: pair.master,
            writer,
            child,
            read_rx: rx,
            pid,
        })
    }
}

#[async_trait]
impl PtyAdapter for UnixPtyAdapter {
    async fn read(&mut self) -> Result<Vec<u8>> {
        let mut collected = Vec::new();
        while let Ok(chunk) = self.read_rx.try_recv() {
            collected.extend_from_slice(&chunk);
            if collected.len() >= READ_CHUNK {
                break;
            }
        }
        Ok(collected)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    async fn resize(&mut self, size: PtySizeSpec) -> Result<()> {
        self.master
            .resize(PtySize {
                rows: size.rows,
                cols: size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| CoreError::Other(format!("pty resize failed: {e}")))
    }

    async fn kill(&mut self) -> Result<()> {
        if let Some(pid) = self.pid {
            let pgid = Pid::from_raw(pid as i32);
            let _ = killpg(pgid, Signal::SIGTERM);
        }
        Ok(())
    }

    async fn interrupt_signal(&mut self) -> Result<()> {
        if let Some(pid) = self.pid {
            let pgid = Pid::from_raw(pid as i32);
            let _ = killpg(pgid, Signal::SIGINT);
        }
        Ok(())
    }

    fn poll(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code() as i32),
            _ => None,
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.child.kill();
        Ok(())
    }
}
