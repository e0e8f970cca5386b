//! PTY session engine and command policy.
//!
//! This crate owns one side of the core: spawning a pseudo-terminal,
//! fanning its bytes out to subscribers, running the exit and
//! graceful-stop protocols, and resolving per-command policy. It
//! knows nothing about a name registry, a worktree, or a transport —
//! those live one layer up.

pub mod ansi;
pub mod config;
pub mod error;
pub mod pty;
pub mod session;

pub use config::{FilePolicyProvider, PolicyProvider, StaticPolicyProvider};
pub use error::{CoreError, Result};
pub use pty::{PtyAdapter, PtySizeSpec};
pub use session::Session;
