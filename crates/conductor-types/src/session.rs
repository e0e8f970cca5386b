use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a session.
///
/// `starting -> running -> stopping -> (exited | killed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Exited,
    Killed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Exited | SessionStatus::Killed)
    }
}

/// Who last requested a terminal resize, if known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeSource {
    Cli,
    Dashboard,
}

/// The `to_dict()` projection of a session: what gets persisted to disk
/// for a resumable, exited session, and what `list_all()` returns for
/// everything else.
///
/// `stop_sequence` is deliberately not part of this projection — the
/// source keeps it out of public views even though it's used
/// internally to drive the graceful-stop writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub status: SessionStatus,
    pub pid: Option<u32>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub exit_code: Option<i32>,
    pub rows: u16,
    pub cols: u16,
    pub resize_source: Option<ResizeSource>,
    pub resume_id: Option<String>,
    pub resume_flag: Option<String>,
    pub resume_command: Option<String>,
}

impl SessionMetadata {
    /// A session is eligible for `resumable` storage only once it has
    /// exited and captured a resume token.
    pub fn is_resumable(&self) -> bool {
        self.status == SessionStatus::Exited && self.resume_id.is_some()
    }
}
