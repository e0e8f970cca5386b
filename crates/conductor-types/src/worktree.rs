use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a worktree record.
///
/// `active` while a session owns it, `finalized` once the session has
/// exited but the branch hasn't merged yet, `orphaned` when the
/// directory underneath the record has gone missing, `stale` is a
/// view-level classification applied by warning/gc passes rather than
/// a state the manager writes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Active,
    Finalized,
    Orphaned,
    Stale,
}

/// One entry in the worktree state store, keyed by `(repo_path, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub name: String,
    pub session_id: Option<String>,
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
    pub base_branch: String,
    pub base_commit: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub status: WorktreeStatus,
    pub commits_ahead: u32,
    pub has_changes: bool,
}

/// How `merge()` folds a worktree's branch back into its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Squash,
    Merge,
    Rebase,
}

/// A single changed path as reported by `diff --name-status` /
/// `diff --numstat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: String,
    pub additions: Option<u32>,
    pub deletions: Option<u32>,
}

/// The dry-run report `preview_merge()` produces before anyone commits
/// to a merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePreview {
    pub can_merge: bool,
    pub commits_ahead: u32,
    pub commits_behind: u32,
    pub conflict_files: Vec<String>,
    pub changed_files: Vec<ChangedFile>,
    pub message: String,
}

/// The outcome of an actual `merge()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub strategy: MergeStrategy,
    pub merged_branch: String,
    pub target_branch: String,
    pub commits_merged: u32,
    pub conflict_files: Vec<String>,
    pub message: String,
}

/// One line of a `gc()` report — what would be (or was) removed, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcAction {
    pub name: String,
    pub repo: PathBuf,
    pub status: WorktreeStatus,
    pub reason: String,
    pub action: String,
}

/// A health warning surfaced by `get_warnings()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeWarning {
    pub name: String,
    pub repo: PathBuf,
    pub level: WarningLevel,
    pub message: String,
}

/// The result of `reconcile()`, run once at daemon start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub orphaned: Vec<String>,
    pub recovered: Vec<String>,
}

/// Dashboard-facing summary of whether a directory is (or sits inside)
/// a git repository, for the create-worktree UI gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitDirectoryInfo {
    pub is_git: bool,
    pub repo_root: Option<PathBuf>,
    pub current_branch: Option<String>,
    pub has_remote: bool,
    pub existing_worktrees: u32,
    pub stale_worktrees: u32,
}
