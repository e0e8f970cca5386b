//! Portable pseudo-terminal adapter.
//!
//! Spawns a child behind a PTY, scrubs its environment, and exposes a
//! small non-blocking surface the [`crate::session::Session`] engine
//! drives from its event loop. Unix and Windows get different readers
//! underneath (see [`unix`] and [`windows`]) but the same trait.

mod unix_adapter;
mod windows_adapter;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

#[cfg(unix)]
pub use unix_adapter::UnixPtyAdapter as PlatformPtyAdapter;
#[cfg(windows)]
pub use windows_adapter::ConPtyAdapter as PlatformPtyAdapter;

/// Prefix stripped from every inherited environment variable before
/// exec, so a nested session can't mistake itself for its parent.
pub const SCRUBBED_ENV_PREFIX: &str = "CLAUDE";

/// Terminal dimensions, in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySizeSpec {
    pub rows: u16,
    pub cols: u16,
}

/// Everything needed to spawn a child behind a PTY.
pub struct SpawnSpec {
    pub command: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub size: PtySizeSpec,
}

/// The async surface a [`Session`](crate::session::Session) drives.
///
/// `read` is expected to be cheap to call frequently and to return an
/// empty vector rather than blocking when nothing is available; the
/// exit-protocol's final drain relies on this to detect EOF/EIO by
/// observing repeated empty reads after the child has exited.
#[async_trait]
pub trait PtyAdapter: Send {
    async fn read(&mut self) -> Result<Vec<u8>>;
    async fn write(&mut self, data: &[u8]) -> Result<()>;
    async fn resize(&mut self, size: PtySizeSpec) -> Result<()>;
    /// Signals the whole process tree to stop; does not wait for exit.
    async fn kill(&mut self) -> Result<()>;
    /// The softer of the two stop signals: `SIGINT` to the process
    /// group on Unix, a literal `0x03` byte on Windows (ConPTY has no
    /// signal-delivery API).
    async fn interrupt_signal(&mut self) -> Result<()>;
    /// Non-blocking check for child exit; `None` while still running.
    fn poll(&mut self) -> Option<i32>;
    fn pid(&self) -> Option<u32>;
    async fn close(&mut self) -> Result<()>;
}

/// Inherits the process environment, applies `TERM=xterm-256color`,
/// strips every `CLAUDE*` variable, then overlays `overrides`.
pub fn build_child_env(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| !k.starts_with(SCRUBBED_ENV_PREFIX))
        .collect();
    env.insert("TERM".to_string(), "xterm-256color".to_string());
    for (k, v) in overrides {
        env.insert(k.clone(), v.clone());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_child_env_strips_claude_prefixed_vars() {
        std::env::set_var("CLAUDE_SESSION_ID", "outer");
        std::env::set_var("CLAUDE_ANYTHING", "outer");
        std::env::set_var("UNRELATED_VAR", "kept");

        let env = build_child_env(&HashMap::new());

        assert!(!env.contains_key("CLAUDE_SESSION_ID"));
        assert!(!env.contains_key("CLAUDE_ANYTHING"));
        assert_eq!(env.get("UNRELATED_VAR").map(String::as_str), Some("kept"));
        assert_eq!(env.get("TERM").map(String::as_str), Some("xterm-256color"));

        std::env::remove_var("CLAUDE_SESSION_ID");
        std::env::remove_var("CLAUDE_ANYTHING");
        std::env::remove_var("UNRELATED_VAR");
    }

    #[test]
    fn build_child_env_overlay_wins_over_term() {
        let mut overrides = HashMap::new();
        overrides.insert("TERM".to_string(), "dumb".to_string());
        let env = build_child_env(&overrides);
        assert_eq!(env.get("TERM").map(String::as_str), Some("dumb"));
    }
}
