//! git-worktree lifecycle: create, finalize, preview/merge, remove,
//! reconcile, GC, and health warnings.
//!
//! Every mutating operation here is grounded line-by-line in the
//! original `WorktreeManager` (`worktrees/manager.py`): branch/path
//! collision numbering, the disposable-merge-worktree dance, and the
//! `.git/info/exclude` bookkeeping all carry over unchanged in
//! semantics, only the shell-out plumbing is idiomatic-Rust.

use crate::error::{Result, WorktreeError};
use crate::git::{self, args};
use crate::state_store::WorktreeStateStore;
use conductor_types::{
    ChangedFile, GcAction, GitDirectoryInfo, MergePreview, MergeResult, MergeStrategy,
    ReconcileReport, WarningLevel, WorktreeRecord, WorktreeStatus, WorktreeWarning,
};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const WORKTREE_DIR_NAME: &str = ".conductor-worktrees";
const BRANCH_PREFIX: &str = "conductor/";
const STALE_THRESHOLD_DAYS: i64 = 3;

/// What `get_diff` returns: the caller picks the flavor via
/// `files_only`, matching the admin-interface `diff (full or
/// file-list)` verb.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffResult {
    Full(String),
    Files(Vec<ChangedFile>),
}

/// Owns the worktree state store and the set of session IDs currently
/// live in the Registry — the latter gates `remove`/`merge`/`gc` so an
/// active session's worktree is never pulled out from under it.
pub struct WorktreeManager {
    store: Arc<WorktreeStateStore>,
    active_sessions: RwLock<HashSet<String>>,
}

impl WorktreeManager {
    pub fn new(store: Arc<WorktreeStateStore>) -> Self {
        Self {
            store,
            active_sessions: RwLock::new(HashSet::new()),
        }
    }

    pub async fn set_active_sessions(&self, session_ids: HashSet<String>) {
        *self.active_sessions.write().await = session_ids;
    }

    async fn is_active(&self, session_id: Option<&str>) -> bool {
        match session_id {
            Some(id) => self.active_sessions.read().await.contains(id),
            None => false,
        }
    }

    // -- Validation -----------------------------------------------------

    pub async fn find_repo_root(path: &Path) -> Option<PathBuf> {
        let output = git::git(path.to_path_buf(), args(&["rev-parse", "--show-toplevel"]))
            .await
            .ok()?;
        if output.success() {
            Some(PathBuf::from(output.stdout.trim()))
        } else {
            None
        }
    }

    /// Dashboard-facing gate: is this path (or an ancestor) a git repo,
    /// and how many worktrees do we already manage in it.
    pub async fn check_git_directory(&self, path: &Path) -> GitDirectoryInfo {
        let mut result = GitDirectoryInfo {
            is_git: false,
            repo_root: None,
            current_branch: None,
            has_remote: false,
            existing_worktrees: 0,
            stale_worktrees: 0,
        };

        let Some(root) = Self::find_repo_root(path).await else {
            return result;
        };
        result.is_git = true;

        if let Ok(branch) =
            git::git_checked(root.clone(), args(&["rev-parse", "--abbrev-ref", "HEAD"])).await
        {
            result.current_branch = Some(branch);
        }
        if let Ok(remotes) = git::git_checked(root.clone(), args(&["remote"])).await {
            result.has_remote = !remotes.trim().is_empty();
        }

        let records = self.store.all_for_repo(&root).await;
        result.existing_worktrees = records.len() as u32;
        result.stale_worktrees = records
            .iter()
            .filter(|r| r.status == WorktreeStatus::Stale)
            .count() as u32;
        result.repo_root = Some(root);
        result
    }

    // -- Create -----------------------------------------------------------

    /// Creates a new worktree and branch for `session_name`, forking
    /// from `base_branch` (or current HEAD when `None`).
    pub async fn create(
        &self,
        session_name: &str,
        session_id: &str,
        repo_path: &Path,
        base_branch: Option<&str>,
    ) -> Result<WorktreeRecord> {
        let root = Self::find_repo_root(repo_path)
            .await
            .ok_or_else(|| WorktreeError::NotAGitRepo(crate::error::PathBufDisplay(repo_path.to_path_buf())))?;

        let base_branch = match base_branch {
            Some(b) => b.to_string(),
            None => git::git_checked(root.clone(), args(&["rev-parse", "--abbrev-ref", "HEAD"])).await?,
        };
        let base_commit = git::git_checked(root.clone(), args(&["rev-parse", "HEAD"])).await?;

        let safe_name = safe_branch_name(session_name);
        let branch = self.resolve_branch_name(&root, &safe_name).await?;
        let worktree_path = self.resolve_worktree_path(&root, &safe_name).await?;

        if let Some(parent) = worktree_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        git::git_checked(
            root.clone(),
            args(&[
                "worktree",
                "add",
                "-b",
                &branch,
                worktree_path.to_string_lossy().as_ref(),
                "HEAD",
            ]),
        )
        .await?;

        ensure_gitignore(&root).await?;

        let now = chrono::Utc::now();
        let record = WorktreeRecord {
            name: session_name.to_string(),
            session_id: Some(session_id.to_string()),
            repo_path: root.clone(),
            worktree_path,
            branch,
            base_branch,
            base_commit,
            created_at: now,
            last_activity: now,
            status: WorktreeStatus::Active,
            commits_ahead: 0,
            has_changes: false,
        };

        self.store.upsert(record.clone()).await?;
        info!(session = %session_name, branch = %record.branch, "created worktree");
        Ok(record)
    }

    async fn resolve_branch_name(&self, root: &Path, safe_name: &str) -> Result<String> {
        let candidate = format!("{BRANCH_PREFIX}{safe_name}");
        if !self.branch_exists(root, &candidate).await {
            return Ok(candidate);
        }
        for i in 2..100 {
            let candidate = format!("{BRANCH_PREFIX}{safe_name}-{i}");
            if !self.branch_exists(root, &candidate).await {
                return Ok(candidate);
            }
        }
        Err(WorktreeError::NameCandidatesExhausted(safe_name.to_string()))
    }

    async fn branch_exists(&self, root: &Path, branch: &str) -> bool {
        git::git(root.to_path_buf(), args(&["rev-parse", "--verify", branch]))
            .await
            .map(|o| o.success())
            .unwrap_or(false)
    }

    async fn resolve_worktree_path(&self, root: &Path, safe_name: &str) -> Result<PathBuf> {
        let worktree_dir = root.join(WORKTREE_DIR_NAME);
        let candidate = worktree_dir.join(safe_name);
        if !path_exists(&candidate).await {
            return Ok(candidate);
        }
        for i in 2..100 {
            let candidate = worktree_dir.join(format!("{safe_name}-{i}"));
            if !path_exists(&candidate).await {
                return Ok(candidate);
            }
        }
        Err(WorktreeError::NameCandidatesExhausted(safe_name.to_string()))
    }

    // -- Finalize / status ------------------------------------------------

    /// Auto-commits outstanding changes and marks the worktree
    /// `finalized`. Called when the owning session exits.
    pub async fn finalize(&self, mut record: WorktreeRecord) -> Result<WorktreeRecord> {
        if !path_exists(&record.worktree_path).await {
            warn!(worktree = %record.name, "worktree path missing during finalize");
            record.status = WorktreeStatus::Orphaned;
            self.store.upsert(record.clone()).await?;
            return Ok(record);
        }

        let status = git::git_checked(
            record.worktree_path.clone(),
            args(&["status", "--porcelain"]),
        )
        .await
        .unwrap_or_default();

        if !status.trim().is_empty() {
            info!(worktree = %record.name, "auto-committing outstanding changes");
            let _ = git::git(record.worktree_path.clone(), args(&["add", "-A"])).await;
            let message = format!("conductor: auto-commit on session exit ({})", record.name);
            let _ = git::git(
                record.worktree_path.clone(),
                args(&["commit", "-m", &message, "--allow-empty-message"]),
            )
            .await;
            record.has_changes = false;
        }

        record.commits_ahead = self.count_commits_ahead(&record).await;
        record.status = WorktreeStatus::Finalized;
        record.last_activity = chrono::Utc::now();
        self.store.upsert(record.clone()).await?;
        info!(worktree = %record.name, commits_ahead = record.commits_ahead, "finalized worktree");
        Ok(record)
    }

    /// Refreshes `has_changes`/`commits_ahead` from git, or flips to
    /// `orphaned` if the directory has disappeared.
    pub async fn refresh_status(&self, mut record: WorktreeRecord) -> Result<WorktreeRecord> {
        if !path_exists(&record.worktree_path).await {
            record.status = WorktreeStatus::Orphaned;
            self.store.upsert(record.clone()).await?;
            return Ok(record);
        }
        if let Ok(status) = git::git_checked(
            record.worktree_path.clone(),
            args(&["status", "--porcelain"]),
        )
        .await
        {
            record.has_changes = !status.trim().is_empty();
        }
        record.commits_ahead = self.count_commits_ahead(&record).await;
        self.store.upsert(record.clone()).await?;
        Ok(record)
    }

    pub async fn update_activity(&self, mut record: WorktreeRecord) -> Result<WorktreeRecord> {
        record.last_activity = chrono::Utc::now();
        self.store.upsert(record.clone()).await?;
        Ok(record)
    }

    // -- List / get ---------------------------------------------------------

    pub async fn get(&self, repo_path: &Path, name: &str) -> Option<WorktreeRecord> {
        self.store.get(repo_path, name).await
    }

    pub async fn list_worktrees(&self, repo_path: Option<&Path>) -> Vec<WorktreeRecord> {
        match repo_path {
            Some(path) => self.store.all_for_repo(path).await,
            None => self.store.all().await,
        }
    }

    // -- Remove ---------------------------------------------------------------

    /// Removes a worktree's directory, branch, and state record.
    /// Refuses if the owning session is still live, unless `force`.
    pub async fn remove(&self, record: &WorktreeRecord, force: bool) -> Result<()> {
        if !force && self.is_active(record.session_id.as_deref()).await {
            return Err(WorktreeError::SessionActive);
        }

        if path_exists(&record.worktree_path).await {
            let removed = git::git(
                record.repo_path.clone(),
                args(&[
                    "worktree",
                    "remove",
                    record.worktree_path.to_string_lossy().as_ref(),
                    "--force",
                ]),
            )
            .await;
            let needs_manual_cleanup = !matches!(removed, Ok(ref o) if o.success());
            if needs_manual_cleanup {
                if path_exists(&record.worktree_path).await {
                    let _ = tokio::fs::remove_dir_all(&record.worktree_path).await;
                }
                let _ = git::git(record.repo_path.clone(), args(&["worktree", "prune"])).await;
            }
        }

        let delete_flag = if force { "-D" } else { "-d" };
        let delete = git::git(
            record.repo_path.clone(),
            args(&["branch", delete_flag, &record.branch]),
        )
        .await;
        if !matches!(delete, Ok(ref o) if o.success()) && !force {
            info!(branch = %record.branch, "keeping branch, unmerged commits still recoverable");
        }

        self.store.remove(&record.repo_path, &record.name).await?;
        info!(worktree = %record.name, "removed worktree");
        Ok(())
    }

    // -- Merge ---------------------------------------------------------------

    pub async fn preview_merge(&self, record: &WorktreeRecord) -> MergePreview {
        let repo = &record.repo_path;
        let branch = &record.branch;
        let target = &record.base_branch;

        let _ = git::git(repo.clone(), args(&["fetch", "origin", target])).await;

        let ahead = self.count_commits_ahead(record).await;
        let behind = git::git_checked(
            repo.clone(),
            args(&["rev-list", "--count", &format!("{branch}..{target}")]),
        )
        .await
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

        let mut changed_files = Vec::new();
        if let Ok(diff) = git::git_checked(
            repo.clone(),
            args(&[
                "diff",
                "--stat",
                "--name-status",
                &format!("{}...{branch}", record.base_commit),
            ]),
        )
        .await
        {
            for line in diff.lines() {
                if let Some((status, path)) = line.split_once('\t') {
                    changed_files.push(ChangedFile {
                        path: path.trim().to_string(),
                        status: status.trim().to_string(),
                        additions: None,
                        deletions: None,
                    });
                }
            }
        }

        let mut conflict_files = Vec::new();
        let mut can_merge = true;
        if let Ok(output) = git::git(
            repo.clone(),
            args(&["merge-tree", "--write-tree", "--no-messages", target, branch]),
        )
        .await
        {
            if !output.success() {
                can_merge = false;
                conflict_files = parse_conflict_lines(&output.stderr);
            }
        }

        let message = if !can_merge {
            format!("{} conflict(s) detected", conflict_files.len())
        } else if ahead == 0 {
            can_merge = false;
            "Nothing to merge".to_string()
        } else {
            String::new()
        };

        MergePreview {
            can_merge,
            commits_ahead: ahead,
            commits_behind: behind,
            conflict_files,
            changed_files,
            message,
        }
    }

    /// Performs the merge in a disposable worktree so the user's main
    /// checkout is never touched directly, for whichever strategy and
    /// ref-update choreography the caller selects.
    pub async fn merge(
        &self,
        record: &WorktreeRecord,
        strategy: MergeStrategy,
        message: Option<String>,
    ) -> Result<MergeResult> {
        if self.is_active(record.session_id.as_deref()).await {
            return Ok(MergeResult {
                success: false,
                strategy,
                merged_branch: record.branch.clone(),
                target_branch: record.base_branch.clone(),
                commits_merged: 0,
                conflict_files: vec![],
                message: format!("Cannot merge: session '{}' is still active", record.name),
            });
        }

        let repo = &record.repo_path;
        let branch = &record.branch;
        let target = &record.base_branch;

        let commits_ahead = self.count_commits_ahead(record).await;
        if commits_ahead == 0 {
            return Ok(MergeResult {
                success: false,
                strategy,
                merged_branch: branch.clone(),
                target_branch: target.clone(),
                commits_merged: 0,
                conflict_files: vec![],
                message: "Nothing to merge (0 commits ahead)".to_string(),
            });
        }

        let message =
            message.unwrap_or_else(|| format!("Merge conductor session '{}' ({commits_ahead} commits)", record.name));

        let tmp_dir = repo.join(WORKTREE_DIR_NAME).join(format!(".merge-tmp-{}", record.name));
        let tmp_branch = format!("conductor/merge-tmp-{}", uuid::Uuid::new_v4());

        let cleanup = |repo: PathBuf, tmp_dir: PathBuf, tmp_branch: String| async move {
            let _ = git::git(
                repo.clone(),
                args(&["worktree", "remove", tmp_dir.to_string_lossy().as_ref(), "--force"]),
            )
            .await;
            let _ = git::git(repo, args(&["branch", "-D", &tmp_branch])).await;
        };

        if let Err(e) = git::git_checked(
            repo.clone(),
            args(&[
                "worktree",
                "add",
                "-b",
                &tmp_branch,
                tmp_dir.to_string_lossy().as_ref(),
                target,
            ]),
        )
        .await
        {
            return Err(e);
        }

        let result = self
            .run_merge_strategy(&tmp_dir, branch, target, strategy, &message)
            .await;

        let merge_outcome = match result {
            Ok(MergeStageOutcome::Conflict(files)) => {
                cleanup(repo.clone(), tmp_dir.clone(), tmp_branch.clone()).await;
                return Ok(MergeResult {
                    success: false,
                    strategy,
                    merged_branch: branch.clone(),
                    target_branch: target.clone(),
                    commits_merged: 0,
                    conflict_files: files,
                    message: "Merge conflicts detected".to_string(),
                });
            }
            Ok(MergeStageOutcome::Done) => self.sync_target_ref(repo, &tmp_dir, target).await,
            Err(e) => {
                cleanup(repo.clone(), tmp_dir.clone(), tmp_branch.clone()).await;
                return Err(e);
            }
        };

        cleanup(repo.clone(), tmp_dir.clone(), tmp_branch.clone()).await;
        merge_outcome?;

        self.remove(record, true).await?;

        info!(worktree = %record.name, %target, commits = commits_ahead, "merged worktree");
        Ok(MergeResult {
            success: true,
            strategy,
            merged_branch: branch.clone(),
            target_branch: target.clone(),
            commits_merged: commits_ahead,
            conflict_files: vec![],
            message: format!("Successfully merged {commits_ahead} commit(s) into {target}"),
        })
    }

    async fn run_merge_strategy(
        &self,
        tmp_dir: &Path,
        branch: &str,
        target: &str,
        strategy: MergeStrategy,
        message: &str,
    ) -> Result<MergeStageOutcome> {
        match strategy {
            MergeStrategy::Squash => {
                let output = git::git(tmp_dir.to_path_buf(), args(&["merge", "--squash", branch])).await?;
                if !output.success() {
                    return Ok(MergeStageOutcome::Conflict(parse_conflict_files(tmp_dir).await));
                }
                git::git_checked(tmp_dir.to_path_buf(), args(&["commit", "-m", message])).await?;
                Ok(MergeStageOutcome::Done)
            }
            MergeStrategy::Merge => {
                let output = git::git(
                    tmp_dir.to_path_buf(),
                    args(&["merge", "--no-ff", "-m", message, branch]),
                )
                .await?;
                if !output.success() {
                    return Ok(MergeStageOutcome::Conflict(parse_conflict_files(tmp_dir).await));
                }
                Ok(MergeStageOutcome::Done)
            }
            MergeStrategy::Rebase => {
                let output = git::git(tmp_dir.to_path_buf(), args(&["rebase", target, branch])).await?;
                if !output.success() {
                    let _ = git::git(tmp_dir.to_path_buf(), args(&["rebase", "--abort"])).await;
                    return Ok(MergeStageOutcome::Conflict(vec![]));
                }
                git::git_checked(tmp_dir.to_path_buf(), args(&["checkout", target])).await?;
                git::git_checked(tmp_dir.to_path_buf(), args(&["merge", "--ff-only", branch])).await?;
                Ok(MergeStageOutcome::Done)
            }
        }
    }

    /// Updates `target`'s ref in the main repo to the tmp worktree's
    /// HEAD, stashing/restoring the main checkout's working tree if it
    /// currently has `target` checked out.
    async fn sync_target_ref(&self, repo: &Path, tmp_dir: &Path, target: &str) -> Result<()> {
        let current_branch = git::git_checked(repo.to_path_buf(), args(&["rev-parse", "--abbrev-ref", "HEAD"]))
            .await
            .unwrap_or_default();
        let sync_worktree = current_branch == target;

        let mut stashed = false;
        if sync_worktree {
            let stash = git::git(
                repo.to_path_buf(),
                args(&["stash", "push", "-m", "conductor-merge-autostash"]),
            )
            .await?;
            stashed = !stash.stdout.contains("No local changes");
        }

        let merge_commit = git::git_checked(tmp_dir.to_path_buf(), args(&["rev-parse", "HEAD"])).await?;
        git::git_checked(
            repo.to_path_buf(),
            args(&["update-ref", &format!("refs/heads/{target}"), &merge_commit]),
        )
        .await?;

        if sync_worktree {
            let _ = git::git(repo.to_path_buf(), args(&["reset", "--hard", "HEAD"])).await;
            if stashed {
                let _ = git::git(repo.to_path_buf(), args(&["stash", "pop"])).await;
            }
        }
        Ok(())
    }

    // -- Diff ---------------------------------------------------------------

    /// Diffs a worktree's branch against its base. Active worktrees
    /// compare the live working tree (including uncommitted and
    /// untracked changes); finalized worktrees compare the committed
    /// branch state.
    pub async fn get_diff(&self, record: &WorktreeRecord, files_only: bool) -> DiffResult {
        let active = record.status == WorktreeStatus::Active && path_exists(&record.worktree_path).await;

        if files_only {
            let mut files = self.diff_numstat(record, active).await;
            if active {
                files.extend(self.untracked_as_changed_files(record).await);
            }
            DiffResult::Files(files)
        } else {
            let mut diff = if active {
                git::git_checked(record.worktree_path.clone(), args(&["diff", &record.base_commit]))
                    .await
                    .unwrap_or_default()
            } else {
                git::git_checked(
                    record.repo_path.clone(),
                    args(&["diff", &format!("{}...{}", record.base_commit, record.branch)]),
                )
                .await
                .unwrap_or_default()
            };
            if active {
                for hunk in self.untracked_as_diff_hunks(record).await {
                    if diff.is_empty() {
                        diff = hunk;
                    } else {
                        diff.push('\n');
                        diff.push_str(&hunk);
                    }
                }
            }
            DiffResult::Full(diff)
        }
    }

    async fn diff_numstat(&self, record: &WorktreeRecord, active: bool) -> Vec<ChangedFile> {
        let (cwd, diff_args): (PathBuf, Vec<String>) = if active {
            (record.worktree_path.clone(), args(&["diff", "--numstat", &record.base_commit]))
        } else {
            (
                record.repo_path.clone(),
                args(&[
                    "diff",
                    "--numstat",
                    &format!("{}...{}", record.base_commit, record.branch),
                ]),
            )
        };
        let Ok(output) = git::git_checked(cwd, diff_args).await else {
            return Vec::new();
        };
        output
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.splitn(3, '\t').collect();
                if parts.len() != 3 {
                    return None;
                }
                Some(ChangedFile {
                    path: parts[2].to_string(),
                    status: "M".to_string(),
                    additions: parts[0].parse().ok(),
                    deletions: parts[1].parse().ok(),
                })
            })
            .collect()
    }

    async fn untracked_files(&self, record: &WorktreeRecord) -> Vec<String> {
        git::git_checked(
            record.worktree_path.clone(),
            args(&["ls-files", "--others", "--exclude-standard"]),
        )
        .await
        .map(|s| s.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
        .unwrap_or_default()
    }

    async fn untracked_as_changed_files(&self, record: &WorktreeRecord) -> Vec<ChangedFile> {
        let mut out = Vec::new();
        for path in self.untracked_files(record).await {
            let full = record.worktree_path.join(&path);
            let lines = tokio::fs::read_to_string(&full).await.map(|c| c.lines().count()).unwrap_or(0);
            out.push(ChangedFile {
                path,
                status: "A".to_string(),
                additions: Some(lines as u32),
                deletions: Some(0),
            });
        }
        out
    }

    async fn untracked_as_diff_hunks(&self, record: &WorktreeRecord) -> Vec<String> {
        let mut hunks = Vec::new();
        for path in self.untracked_files(record).await {
            let full = record.worktree_path.join(&path);
            let Ok(content) = tokio::fs::read_to_string(&full).await else {
                continue;
            };
            let lines: Vec<&str> = content.split('\n').collect();
            let mut hunk = format!(
                "diff --git a/{path} b/{path}\nnew file mode 100644\n--- /dev/null\n+++ b/{path}\n@@ -0,0 +1,{} @@\n",
                lines.len()
            );
            hunk.push_str(&lines.iter().map(|l| format!("+{l}")).collect::<Vec<_>>().join("\n"));
            hunks.push(hunk);
        }
        hunks
    }

    // -- Reconcile (crash recovery) ------------------------------------------

    /// Cross-references persisted state with reality at daemon start:
    /// marks missing directories `orphaned`, finalizes `active` records
    /// whose session didn't survive the restart.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for record in self.store.all().await {
            if !path_exists(&record.worktree_path).await {
                let mut orphaned = record.clone();
                orphaned.status = WorktreeStatus::Orphaned;
                if self.store.upsert(orphaned).await.is_ok() {
                    report.orphaned.push(record.name.clone());
                    warn!(worktree = %record.name, "marked orphaned, directory missing");
                }
                continue;
            }
            if record.status == WorktreeStatus::Active && !self.is_active(record.session_id.as_deref()).await {
                if self.finalize(record.clone()).await.is_ok() {
                    report.recovered.push(record.name.clone());
                    info!(worktree = %record.name, "recovered orphaned active worktree on restart");
                }
            }
        }
        report
    }

    // -- GC -------------------------------------------------------------------

    /// Removes `orphaned` records, and `finalized`/`stale` records idle
    /// past `max_age_days`. `dry_run` reports without mutating.
    pub async fn gc(&self, max_age_days: i64, dry_run: bool) -> Vec<GcAction> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(max_age_days);
        let mut actions = Vec::new();

        for record in self.store.all().await {
            if self.is_active(record.session_id.as_deref()).await {
                continue;
            }

            let reason = match record.status {
                WorktreeStatus::Orphaned => Some("orphaned (path missing)".to_string()),
                WorktreeStatus::Finalized | WorktreeStatus::Stale if record.last_activity < cutoff => Some(format!(
                    "stale ({:?}, inactive > {max_age_days}d)",
                    record.status
                )),
                _ => None,
            };

            let Some(reason) = reason else { continue };

            let mut action = GcAction {
                name: record.name.clone(),
                repo: record.repo_path.clone(),
                status: record.status,
                reason,
                action: if dry_run { "would remove".to_string() } else { "removed".to_string() },
            };

            if !dry_run {
                if let Err(e) = self.remove(&record, true).await {
                    action.action = format!("failed: {e}");
                    warn!(worktree = %record.name, error = %e, "gc removal failed");
                }
            }
            actions.push(action);
        }
        actions
    }

    // -- Warnings ---------------------------------------------------------

    pub async fn get_warnings(&self) -> Vec<WorktreeWarning> {
        let stale_threshold = chrono::Utc::now() - chrono::Duration::days(STALE_THRESHOLD_DAYS);
        let mut warnings = Vec::new();

        for record in self.store.all().await {
            if record.status == WorktreeStatus::Orphaned {
                warnings.push(WorktreeWarning {
                    name: record.name.clone(),
                    repo: record.repo_path.clone(),
                    level: WarningLevel::Error,
                    message: format!("Worktree '{}' is orphaned (directory missing)", record.name),
                });
            } else if record.status == WorktreeStatus::Finalized && record.last_activity < stale_threshold {
                let age_days = (chrono::Utc::now() - record.last_activity).num_days();
                warnings.push(WorktreeWarning {
                    name: record.name.clone(),
                    repo: record.repo_path.clone(),
                    level: WarningLevel::Warning,
                    message: format!(
                        "Worktree '{}' has been idle for {age_days} days. Consider merging or discarding.",
                        record.name
                    ),
                });
            } else if record.status == WorktreeStatus::Active
                && !self.is_active(record.session_id.as_deref()).await
                && record.last_activity < stale_threshold
            {
                warnings.push(WorktreeWarning {
                    name: record.name.clone(),
                    repo: record.repo_path.clone(),
                    level: WarningLevel::Warning,
                    message: format!("Worktree '{}' has no active session and is idle.", record.name),
                });
            }
        }
        warnings
    }

    // -- Private helpers ----------------------------------------------------

    async fn count_commits_ahead(&self, record: &WorktreeRecord) -> u32 {
        git::git_checked(
            record.repo_path.clone(),
            args(&[
                "rev-list",
                "--count",
                &format!("{}..{}", record.base_commit, record.branch),
            ]),
        )
        .await
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
    }
}

enum MergeStageOutcome {
    Done,
    Conflict(Vec<String>),
}

async fn parse_conflict_files(worktree_path: &Path) -> Vec<String> {
    git::git_checked(
        worktree_path.to_path_buf(),
        args(&["diff", "--name-only", "--diff-filter=U"]),
    )
    .await
    .map(|s| s.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    .unwrap_or_default()
}

fn parse_conflict_lines(stderr: &str) -> Vec<String> {
    let conflict_re = Regex::new(r"CONFLICT.*?:\s+(.+)").expect("static regex is valid");
    let mut files = Vec::new();
    for line in stderr.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = conflict_re.captures(line) {
            if let Some(m) = caps.get(1) {
                files.push(m.as_str().to_string());
            }
        } else if !line.starts_with("CONFLICT") {
            files.push(line.to_string());
        }
    }
    files
}

/// `conductor/<safe>` where `safe` replaces every non-`[A-Za-z0-9_.-]`
/// byte with `-` and trims leading/trailing `-`. Session names may
/// contain spaces (the name-validation regex permits them); this is
/// where that asymmetry gets collapsed.
fn safe_branch_name(session_name: &str) -> String {
    let replaced: String = session_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' { c } else { '-' })
        .collect();
    replaced.trim_matches('-').to_string()
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Appends `/.conductor-worktrees/` to `.git/info/exclude` (never the
/// tracked `.gitignore`) the first time a repo gets a managed worktree.
async fn ensure_gitignore(repo_root: &Path) -> Result<()> {
    let exclude_path = repo_root.join(".git").join("info").join("exclude");
    let entry = format!("/{WORKTREE_DIR_NAME}/");

    if path_exists(&exclude_path).await {
        let content = tokio::fs::read_to_string(&exclude_path).await?;
        if content.contains(&entry) || content.contains(WORKTREE_DIR_NAME) {
            return Ok(());
        }
        let mut updated = content;
        if !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&format!("\n# Conductor worktrees\n{entry}\n"));
        tokio::fs::write(&exclude_path, updated).await?;
    } else {
        if let Some(parent) = exclude_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&exclude_path, format!("# Conductor worktrees\n{entry}\n")).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_branch_name_collapses_spaces_and_symbols() {
        assert_eq!(safe_branch_name("my cool session!"), "my-cool-session-");
        assert_eq!(safe_branch_name("--leading-trailing--"), "leading-trailing");
    }

    #[test]
    fn parse_conflict_lines_extracts_paths() {
        let stderr = "CONFLICT (content): Merge conflict in src/main.rs\nsome other line";
        let files = parse_conflict_lines(stderr);
        assert!(files.iter().any(|f| f.contains("src/main.rs")));
    }

    async fn init_repo(dir: &Path) {
        git::git_checked(dir.to_path_buf(), args(&["init"])).await.unwrap();
        git::git_checked(dir.to_path_buf(), args(&["config", "user.email", "test@example.com"]))
            .await
            .unwrap();
        git::git_checked(dir.to_path_buf(), args(&["config", "user.name", "Test"]))
            .await
            .unwrap();
        tokio::fs::write(dir.join("README.md"), "hello\n").await.unwrap();
        git::git_checked(dir.to_path_buf(), args(&["add", "-A"])).await.unwrap();
        git::git_checked(dir.to_path_buf(), args(&["commit", "-m", "initial"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_makes_a_conductor_prefixed_branch_under_the_worktrees_dir() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;

        let store = Arc::new(WorktreeStateStore::load(dir.path().join("state.json")).await);
        let manager = WorktreeManager::new(store);

        let record = manager
            .create("feat one", "sess-1", dir.path(), None)
            .await
            .expect("create should succeed");

        assert!(record.branch.starts_with("conductor/"));
        assert!(record.worktree_path.starts_with(dir.path().join(".conductor-worktrees")));
    }

    #[tokio::test]
    async fn create_numbers_colliding_branches() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let store = Arc::new(WorktreeStateStore::load(dir.path().join("state.json")).await);
        let manager = WorktreeManager::new(store);

        let first = manager.create("feat", "sess-1", dir.path(), None).await.unwrap();
        assert_eq!(first.branch, "conductor/feat");

        // Simulate a pre-existing branch by creating + removing the record
        // but leaving the actual git branch behind.
        manager.store.remove(&first.repo_path, &first.name).await.unwrap();

        let second = manager.create("feat", "sess-2", dir.path(), None).await.unwrap();
        assert_eq!(second.branch, "conductor/feat-2");
    }

    #[tokio::test]
    async fn gc_dry_run_reports_without_mutating() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let store = Arc::new(WorktreeStateStore::load(dir.path().join("state.json")).await);
        let manager = WorktreeManager::new(store);

        let mut record = manager.create("feat", "sess-1", dir.path(), None).await.unwrap();
        record.status = WorktreeStatus::Orphaned;
        manager.store.upsert(record.clone()).await.unwrap();

        let actions = manager.gc(7, true).await;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, "would remove");

        let still_there = manager.get(&record.repo_path, &record.name).await;
        assert!(still_there.is_some());
    }
}
