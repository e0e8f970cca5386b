//! Thin adapters exposing the session engine, registry, and worktree
//! manager to whatever transport a caller wires on top — a thin
//! orchestration layer over the registry and manager, not a transport
//! itself.
//!
//! No HTTP/WebSocket server lives here; that's the out-of-scope
//! transport layer. `StreamSink` models the one verb a transport needs
//! that can't be expressed as a plain request/response call.

use async_trait::async_trait;
use bytes::Bytes;
use conductor_core::Session;
use conductor_registry::{CreateRequest, CreateSource, SessionRegistry};
use conductor_types::{
    GcAction, GitDirectoryInfo, MergePreview, MergeResult, MergeStrategy, ReconcileReport,
    SessionMetadata, SymbolicKey, WorktreeRecord, WorktreeWarning,
};
use conductor_worktree::{DiffResult, WorktreeManager};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Requests a session run inside a fresh managed git worktree instead
/// of a plain directory. The worktree is created before the session's
/// PTY spawns (so `cwd` can be the worktree path) and finalized once
/// the session exits.
#[derive(Debug, Clone)]
pub struct WorktreeRequest {
    pub repo_path: PathBuf,
    pub base_branch: Option<String>,
}

/// What a client sends on the `send-input` verb: raw text/bytes, or a
/// symbolic key from the exhaustive set the core recognizes.
#[derive(Debug, Clone)]
pub enum InputPayload {
    Text(String),
    Key(SymbolicKey),
}

impl InputPayload {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            InputPayload::Text(s) => s.into_bytes(),
            InputPayload::Key(key) => key.as_bytes(),
        }
    }
}

/// Request shape for the `create-session` verb.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub rows: u16,
    pub cols: u16,
    pub source: CreateSource,
    /// When set, `cwd` is ignored and the session instead runs inside
    /// a freshly created worktree under `worktree.repo_path`.
    pub worktree: Option<WorktreeRequest>,
}

/// How a client asks a session to stop: `kill` removes it and its
/// metadata outright, `graceful` runs the policy stop sequence and
/// resolves to `resumable` iff a token is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Kill,
    Graceful,
}

/// The create/list/get/stop/resize/input/resume/kill surface the
/// transport layer drives for sessions. One verb per behavior; wire
/// format is up to the caller.
#[async_trait]
pub trait SessionAdmin: Send + Sync {
    async fn list_sessions(&self) -> Vec<SessionMetadata>;
    async fn get_session(&self, name: &str) -> Option<SessionMetadata>;
    async fn create_session(&self, req: CreateSessionRequest) -> conductor_registry::Result<SessionMetadata>;
    async fn send_input(&self, name: &str, input: InputPayload) -> conductor_registry::Result<()>;
    async fn resize(&self, name: &str, rows: u16, cols: u16, source: Option<conductor_types::ResizeSource>) -> conductor_registry::Result<()>;
    async fn stop(&self, name: &str, mode: StopMode, graceful_timeout: Duration) -> conductor_registry::Result<()>;
    async fn resume(&self, name: &str) -> conductor_registry::Result<SessionMetadata>;
    async fn dismiss_resumable(&self, name: &str) -> conductor_registry::Result<()>;
}

pub struct RegistrySessionAdmin {
    registry: SessionRegistry,
    worktrees: Option<Arc<WorktreeManager>>,
    /// Session name -> repo root, for sessions created with a
    /// worktree; consumed by the exit-listener task to find the
    /// matching worktree record to finalize.
    session_repo: Arc<RwLock<HashMap<String, PathBuf>>>,
}

impl RegistrySessionAdmin {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            worktrees: None,
            session_repo: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Like [`Self::new`], additionally wiring worktree support:
    /// `create_session` requests that carry a [`WorktreeRequest`]
    /// create their worktree first, and a background task finalizes
    /// it once the owning session exits.
    pub fn with_worktrees(registry: SessionRegistry, worktrees: Arc<WorktreeManager>) -> Self {
        let session_repo = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(run_worktree_finalizer(
            registry.subscribe_exits(),
            worktrees.clone(),
            session_repo.clone(),
        ));
        Self {
            registry,
            worktrees: Some(worktrees),
            session_repo,
        }
    }

    /// Looks up the live handle a `StreamSink` needs to subscribe.
    pub async fn find_live(&self, name: &str) -> Option<Session> {
        self.registry.get(name).await
    }
}

#[async_trait]
impl SessionAdmin for RegistrySessionAdmin {
    async fn list_sessions(&self) -> Vec<SessionMetadata> {
        self.registry.list_all().await
    }

    async fn get_session(&self, name: &str) -> Option<SessionMetadata> {
        if let Some(session) = self.registry.get(name).await {
            return Some(session.metadata().await);
        }
        self.list_sessions().await.into_iter().find(|m| m.name == name)
    }

    async fn create_session(&self, req: CreateSessionRequest) -> conductor_registry::Result<SessionMetadata> {
        let session_id = uuid::Uuid::new_v4().to_string();

        let cwd = match &req.worktree {
            Some(wt) => {
                let manager = self.worktrees.as_ref().ok_or_else(|| {
                    conductor_registry::RegistryError::Core(conductor_core::CoreError::Other(
                        "session create requested a worktree but no worktree manager is wired"
                            .to_string(),
                    ))
                })?;
                let record = manager
                    .create(&req.name, &session_id, &wt.repo_path, wt.base_branch.as_deref())
                    .await
                    .map_err(|e| {
                        conductor_registry::RegistryError::Core(conductor_core::CoreError::Other(
                            format!("worktree create failed: {e}"),
                        ))
                    })?;
                self.session_repo
                    .write()
                    .await
                    .insert(req.name.clone(), record.repo_path.clone());
                record.worktree_path
            }
            None => req.cwd,
        };

        let session = self
            .registry
            .create(CreateRequest {
                name: req.name,
                command: req.command,
                cwd,
                env: req.env,
                rows: req.rows,
                cols: req.cols,
                source: req.source,
                id: Some(session_id),
            })
            .await?;
        Ok(session.metadata().await)
    }

    async fn send_input(&self, name: &str, input: InputPayload) -> conductor_registry::Result<()> {
        let session = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| conductor_registry::RegistryError::NotFound(name.to_string()))?;
        session.send_input(input.into_bytes()).await;
        Ok(())
    }

    async fn resize(&self, name: &str, rows: u16, cols: u16, source: Option<conductor_types::ResizeSource>) -> conductor_registry::Result<()> {
        let session = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| conductor_registry::RegistryError::NotFound(name.to_string()))?;
        session.resize(rows, cols, source).await;
        Ok(())
    }

    async fn stop(&self, name: &str, mode: StopMode, graceful_timeout: Duration) -> conductor_registry::Result<()> {
        match mode {
            StopMode::Kill => self.registry.remove(name).await,
            StopMode::Graceful => self.registry.graceful_stop(name, graceful_timeout).await,
        }
    }

    async fn resume(&self, name: &str) -> conductor_registry::Result<SessionMetadata> {
        let session = self.registry.resume(name).await?;
        Ok(session.metadata().await)
    }

    async fn dismiss_resumable(&self, name: &str) -> conductor_registry::Result<()> {
        self.registry.dismiss_resumable(name).await
    }
}

/// The list/get/diff/preview-merge/merge/remove/gc surface for
/// worktrees.
#[async_trait]
pub trait WorktreeAdmin: Send + Sync {
    async fn list(&self, repo_path: Option<&std::path::Path>) -> Vec<WorktreeRecord>;
    async fn get(&self, repo_path: &std::path::Path, name: &str) -> Option<WorktreeRecord>;
    async fn check_git_directory(&self, path: &std::path::Path) -> GitDirectoryInfo;
    async fn diff(&self, repo_path: &std::path::Path, name: &str, files_only: bool) -> Option<DiffResult>;
    async fn preview_merge(&self, repo_path: &std::path::Path, name: &str) -> Option<MergePreview>;
    async fn merge(
        &self,
        repo_path: &std::path::Path,
        name: &str,
        strategy: MergeStrategy,
        message: Option<String>,
    ) -> conductor_worktree::Result<MergeResult>;
    async fn remove(&self, repo_path: &std::path::Path, name: &str, force: bool) -> conductor_worktree::Result<()>;
    async fn gc(&self, max_age_days: i64, dry_run: bool) -> Vec<GcAction>;
    async fn reconcile(&self) -> ReconcileReport;
    async fn warnings(&self) -> Vec<WorktreeWarning>;
}

pub struct ManagerWorktreeAdmin {
    manager: std::sync::Arc<WorktreeManager>,
}

impl ManagerWorktreeAdmin {
    pub fn new(manager: std::sync::Arc<WorktreeManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl WorktreeAdmin for ManagerWorktreeAdmin {
    async fn list(&self, repo_path: Option<&std::path::Path>) -> Vec<WorktreeRecord> {
        self.manager.list_worktrees(repo_path).await
    }

    async fn get(&self, repo_path: &std::path::Path, name: &str) -> Option<WorktreeRecord> {
        self.manager.get(repo_path, name).await
    }

    async fn check_git_directory(&self, path: &std::path::Path) -> GitDirectoryInfo {
        self.manager.check_git_directory(path).await
    }

    async fn diff(&self, repo_path: &std::path::Path, name: &str, files_only: bool) -> Option<DiffResult> {
        let record = self.manager.get(repo_path, name).await?;
        Some(self.manager.get_diff(&record, files_only).await)
    }

    async fn preview_merge(&self, repo_path: &std::path::Path, name: &str) -> Option<MergePreview> {
        let record = self.manager.get(repo_path, name).await?;
        Some(self.manager.preview_merge(&record).await)
    }

    async fn merge(
        &self,
        repo_path: &std::path::Path,
        name: &str,
        strategy: MergeStrategy,
        message: Option<String>,
    ) -> conductor_worktree::Result<MergeResult> {
        let record = self
            .manager
            .get(repo_path, name)
            .await
            .ok_or_else(|| conductor_worktree::WorktreeError::NotFound(name.to_string()))?;
        self.manager.merge(&record, strategy, message).await
    }

    async fn remove(&self, repo_path: &std::path::Path, name: &str, force: bool) -> conductor_worktree::Result<()> {
        let record = self
            .manager
            .get(repo_path, name)
            .await
            .ok_or_else(|| conductor_worktree::WorktreeError::NotFound(name.to_string()))?;
        self.manager.remove(&record, force).await
    }

    async fn gc(&self, max_age_days: i64, dry_run: bool) -> Vec<GcAction> {
        self.manager.gc(max_age_days, dry_run).await
    }

    async fn reconcile(&self) -> ReconcileReport {
        self.manager.reconcile().await
    }

    async fn warnings(&self) -> Vec<WorktreeWarning> {
        self.manager.get_warnings().await
    }
}

/// Finalizes a session's worktree (auto-commit + status flip) once its
/// exit has been observed on the registry's exit-notification channel.
/// Sessions created without a worktree are simply absent from
/// `session_repo` and are a no-op here.
async fn run_worktree_finalizer(
    mut exits: tokio::sync::broadcast::Receiver<SessionMetadata>,
    worktrees: Arc<WorktreeManager>,
    session_repo: Arc<RwLock<HashMap<String, PathBuf>>>,
) {
    loop {
        let meta = match exits.recv().await {
            Ok(meta) => meta,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };
        let Some(repo_path) = session_repo.write().await.remove(&meta.name) else {
            continue;
        };
        let Some(record) = worktrees.get(&repo_path, &meta.name).await else {
            continue;
        };
        if let Err(e) = worktrees.finalize(record).await {
            tracing::warn!(session = %meta.name, error = %e, "failed to finalize worktree on session exit");
        }
    }
}

/// A frame the stream endpoint forwards to a connected client: the
/// "replay then live" shape — first the rolling buffer, then bytes as
/// they arrive, terminated by `Closed`.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Bytes(Bytes),
    Closed,
}

/// Drives one subscriber's lifecycle: send the replay buffer, then
/// forward queue items until the null sentinel, then stop. A
/// transport crate implements `push` to actually get bytes to its
/// client (a WebSocket frame, an SSE event, ...).
#[async_trait]
pub trait StreamSink: Send {
    async fn push(&mut self, frame: StreamFrame);
}

/// Runs the stream endpoint's connect protocol against `session`,
/// forwarding frames to `sink` until the session closes or the caller
/// drops the returned future.
pub async fn run_stream(session: &Session, sink: &mut dyn StreamSink) {
    // Subscribe before replaying the buffer so no bytes emitted in the
    // gap between the two calls are lost (a duplicate at the replay
    // boundary is possible but harmless; a drop is not).
    let (id, mut rx) = session.subscribe().await;
    let replay = session.get_buffer().await;
    if !replay.is_empty() {
        sink.push(StreamFrame::Bytes(Bytes::from(replay))).await;
    }
    while let Some(item) = rx.recv().await {
        match item {
            Some(bytes) => sink.push(StreamFrame::Bytes(bytes)).await,
            None => break,
        }
    }
    sink.push(StreamFrame::Closed).await;
    session.unsubscribe(id).await;
}
