//! Pure types shared by every conductor crate.
//!
//! Nothing in here touches a runtime, a filesystem, or a subprocess —
//! just the shapes that travel between the session engine, the
//! registry, the worktree manager, and whatever transport a caller
//! wires on top.

mod keys;
mod policy;
mod session;
mod worktree;

pub use keys::SymbolicKey;
pub use policy::CommandPolicyRecord;
pub use session::{ResizeSource, SessionMetadata, SessionStatus};
pub use worktree::{
    ChangedFile, GcAction, GitDirectoryInfo, MergePreview, MergeResult, MergeStrategy,
    ReconcileReport, WarningLevel, WorktreeRecord, WorktreeStatus, WorktreeWarning,
};

/// Name validation regex, as text (compiled lazily by whoever needs a
/// `Regex`, to keep this crate dependency-light).
///
/// `^[A-Za-z0-9][A-Za-z0-9 _.~-]{0,63}$` — note this permits spaces;
/// only the worktree branch-name transform collapses them to `-`.
pub const SESSION_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9 _.~-]{0,63}$";

/// Default rolling output buffer cap, in bytes.
pub const BUFFER_MAX_BYTES: usize = 1_000_000;

/// Capacity of each subscriber's bounded output queue.
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 1000;

/// Default graceful-stop escalation timeout, in seconds.
pub const GRACEFUL_STOP_TIMEOUT_SECS: u64 = 30;
