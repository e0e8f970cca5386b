use super::{build_child_env, PtyAdapter, PtySizeSpec, SpawnSpec};
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use portable_pty::{Child, CommandBuilder, NativePtySystem, PtySize, PtySystem};
use regex::bytes::Regex;
use std::io::{Read, Write};
use tokio::sync::mpsc;

const READ_CHUNK: usize = 64 * 1024;

/// ConPTY leaks terminal-query responses (device attributes, cursor
/// position reports) into the output stream on some Windows builds.
/// Matches `ESC [ ? <digits> ; … (c|R|n)` and `ESC [ > <digits> c`.
static QUERY_LEAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)\x1b\[\?[0-9;]*[cRn]|\x1b\[>[0-9]*c").expect("static regex is valid")
});

fn strip_query_leaks(data: &[u8]) -> Vec<u8> {
    QUERY_LEAK.replace_all(data, &b""[..]).into_owned()
}

/// ConPTY has no pollable descriptor, so a dedicated reader thread
/// pumps bytes into a channel the async engine drains non-blockingly.
pub struct ConPtyAdapter {
    master: Box<dyn portable_pty::MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    child: Box<dyn Child + Send + Sync>,
    read_rx: mpsc::Receiver<Vec<u8>>,
    pid: Option<u32>,
}

impl ConPtyAdapter {
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

        let mut cmd = CommandBuilder::new("cmd.exe");
        cmd.arg("/C");
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
                        let cleaned = strip_query_leaks(&buf[..n]);
                        if !cleaned.is_empty() && tx.blocking_send(cleaned).is_err() {
                            break;
                        }
                    }
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
impl PtyAdapter for ConPtyAdapter {
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
            let _ = std::process::Command::new("taskkill")
                .args(["/F", "/T", "/PID", &pid.to_string()])
                .output();
        }
        Ok(())
    }

    async fn interrupt_signal(&mut self) -> Result<()> {
        self.writer.write_all(&[0x03])?;
        self.writer.flush()?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_device_attribute_query_leak() {
        let input = b"hello\x1b[?1;2cworld".to_vec();
        assert_eq!(strip_query_leaks(&input), b"helloworld".to_vec());
    }

    #[test]
    fn strips_secondary_device_attribute_leak() {
        let input = b"\x1b[>0cprompt$ ".to_vec();
        assert_eq!(strip_query_leaks(&input), b"prompt$ ".to_vec());
    }
}
