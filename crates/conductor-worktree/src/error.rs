use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBufDisplay),

    #[error("no worktree record for `{0}`")]
    NotFound(String),

    #[error("a worktree record for `{0}` already exists")]
    AlreadyExists(String),

    #[error("session is still active, refusing to remove its worktree")]
    SessionActive,

    #[error("exhausted name candidates for `{0}`")]
    NameCandidatesExhausted(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("merge produced conflicts in {0} file(s)")]
    MergeConflict(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Thin wrapper so `PathBuf` gets a `Display` impl usable in `#[error(...)]`.
#[derive(Debug)]
pub struct PathBufDisplay(pub std::path::PathBuf);

impl std::fmt::Display for PathBufDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

pub type Result<T> = std::result::Result<T, WorktreeError>;
