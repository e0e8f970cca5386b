//! Wires the session engine, registry, and worktree manager into one
//! daemon process: state-root layout, policy loading, PID-file
//! bookkeeping, startup reconciliation, and the thin `SessionAdmin`/
//! `WorktreeAdmin` traits a transport crate drives.
//!
//! No transport (HTTP/WebSocket) lives here — that surface is out of
//! scope for this crate. This crate is the seam a future
//! `conductor-server` would sit behind, between a wire-protocol server
//! and the registry/manager it drives.

pub mod admin;
pub mod config;
pub mod error;
pub mod logging;

pub use admin::{
    CreateSessionRequest, InputPayload, ManagerWorktreeAdmin, RegistrySessionAdmin, SessionAdmin,
    StopMode, StreamFrame, StreamSink, WorktreeAdmin,
};
pub use config::StateRoot;
pub use error::{DaemonError, Result};

use conductor_core::{FilePolicyProvider, PolicyProvider};
use conductor_registry::SessionRegistry;
use conductor_worktree::{WorktreeManager, WorktreeStateStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

/// How often the worktree manager's view of "which sessions are live"
/// is refreshed from the registry, so a worktree's owning session
/// exiting is noticed without the admin interface having to push it.
const ACTIVE_SESSION_SYNC_INTERVAL: Duration = Duration::from_secs(5);

/// Default escalation timeout for a `graceful` stop request, matching
/// `GRACEFUL_STOP_TIMEOUT_SECS` in `conductor-types`.
pub const DEFAULT_GRACEFUL_STOP_TIMEOUT: Duration =
    Duration::from_secs(conductor_types::GRACEFUL_STOP_TIMEOUT_SECS);

/// One running daemon: the state root, the policy provider, the
/// session registry, and the worktree store/manager pair. Cheap to
/// clone — every field is itself an `Arc`-backed handle.
#[derive(Clone)]
pub struct Daemon {
    state_root: Arc<StateRoot>,
    policy: Arc<FilePolicyProvider>,
    registry: SessionRegistry,
    worktrees: Arc<WorktreeManager>,
    /// Built once in `bootstrap` and handed out by reference: it owns
    /// the background worktree-finalizer task, which must not be
    /// spawned more than once per daemon.
    session_admin: Arc<RegistrySessionAdmin>,
}

impl Daemon {
    /// Builds every component and runs startup reconciliation, but does
    /// not write the PID file or start the background sync task — call
    /// [`Self::run_as_process`] for that, or drive those steps
    /// yourself when embedding the daemon in a test harness.
    pub async fn bootstrap() -> Result<Self> {
        let state_root = StateRoot::resolve()?;
        state_root.ensure_dirs().await?;

        let policy = Arc::new(FilePolicyProvider::new(state_root.config_file()));
        policy.ensure_default_file()?;

        let registry = SessionRegistry::with_uploads_dir(
            state_root.sessions_dir(),
            Some(state_root.uploads_dir()),
            policy.clone() as Arc<dyn PolicyProvider>,
        );

        let store = Arc::new(WorktreeStateStore::load(state_root.worktrees_file()).await);
        let worktrees = Arc::new(WorktreeManager::new(store));
        let session_admin = Arc::new(RegistrySessionAdmin::with_worktrees(
            registry.clone(),
            worktrees.clone(),
        ));

        let daemon = Self {
            state_root: Arc::new(state_root),
            policy,
            registry,
            worktrees,
            session_admin,
        };

        daemon.sync_active_sessions().await;
        let report = daemon.worktrees.reconcile().await;
        if !report.orphaned.is_empty() || !report.recovered.is_empty() {
            info!(
                orphaned = report.orphaned.len(),
                recovered = report.recovered.len(),
                "worktree reconciliation complete"
            );
        }

        Ok(daemon)
    }

    /// Full process lifecycle: bootstrap, claim the PID file, spawn the
    /// active-session sync loop, and return a guard whose `Drop`...
    /// actually, shutdown needs to be explicit (async), so this returns
    /// `Self` and the caller is expected to call [`Self::shutdown`] from
    /// its own `tokio::select!`-driven signal-handling loop.
    pub async fn run_as_process() -> Result<Self> {
        let daemon = Self::bootstrap().await?;
        config::write_pid_file(&daemon.state_root).await?;
        daemon.clone().spawn_active_session_sync();
        Ok(daemon)
    }

    pub fn state_root(&self) -> &StateRoot {
        &self.state_root
    }

    pub fn session_admin(&self) -> Arc<RegistrySessionAdmin> {
        self.session_admin.clone()
    }

    pub fn worktree_admin(&self) -> ManagerWorktreeAdmin {
        ManagerWorktreeAdmin::new(self.worktrees.clone())
    }

    pub fn policy(&self) -> Arc<FilePolicyProvider> {
        self.policy.clone()
    }

    async fn sync_active_sessions(&self) {
        let ids = self.registry.live_session_ids().await;
        self.worktrees.set_active_sessions(ids).await;
    }

    fn spawn_active_session_sync(self) {
        tokio::spawn(async move {
            let mut ticker = interval(ACTIVE_SESSION_SYNC_INTERVAL);
            loop {
                ticker.tick().await;
                self.sync_active_sessions().await;
            }
        });
    }

    /// Clean process shutdown: hard-kills every live session and
    /// removes the PID file. The registry's own exit callback is what
    /// persists any session that captured a resume token on the way
    /// down.
    pub async fn shutdown(&self) {
        info!("shutting down, killing live sessions");
        self.registry.cleanup_all().await;
        config::remove_pid_file(&self.state_root).await;
    }
}

/// Best-effort warning sweep, logged at the level `get_warnings()`
/// assigns each entry — a daemon binary can call this on an interval
/// or expose it through `WorktreeAdmin::warnings`.
pub async fn log_worktree_warnings(daemon: &Daemon) {
    for warning in daemon.worktrees.get_warnings().await {
        match warning.level {
            conductor_types::WarningLevel::Error => {
                error!(worktree = %warning.name, repo = %warning.repo.display(), "{}", warning.message)
            }
            conductor_types::WarningLevel::Warning => {
                warn!(worktree = %warning.name, repo = %warning.repo.display(), "{}", warning.message)
            }
        }
    }
}
