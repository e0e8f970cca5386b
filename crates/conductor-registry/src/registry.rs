//! Name-keyed session registry: the live map, the resumable map, and
//! the exit callback that moves a session between them.

use crate::error::{RegistryError, Result};
use crate::persistence;
use conductor_core::{PolicyProvider, Session};
use conductor_types::{ResizeSource, SessionMetadata, SESSION_NAME_PATTERN};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::info;

/// Exit notifications are a best-effort fan-out (e.g. for worktree
/// finalization); a lagging or absent subscriber never blocks the
/// registry itself.
const EXIT_NOTIFY_CAPACITY: usize = 256;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(SESSION_NAME_PATTERN).expect("static name pattern is valid"));

/// Where a create request originated; the dashboard is subject to the
/// command whitelist, the CLI bypasses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateSource {
    Cli,
    Dashboard,
}

pub struct CreateRequest {
    pub name: String,
    pub command: String,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub rows: u16,
    pub cols: u16,
    pub source: CreateSource,
    /// Pre-generated session id, used when a caller needs to know the
    /// id before the session exists (e.g. to create its worktree
    /// first and pass the same id through). `None` generates a fresh
    /// one, the common case.
    pub id: Option<String>,
}

/// Where per-session uploaded files live, so the exit protocol can
/// remove them once the session is done. Computed by the caller from
/// its own state-root layout (`<state_root>/uploads/<session_id>`).
fn uploads_dir_for(base: &Path, session_id: &str) -> PathBuf {
    base.join(session_id)
}

struct Inner {
    live: RwLock<HashMap<String, Session>>,
    resumable: RwLock<HashMap<String, SessionMetadata>>,
    /// Names killed via `remove`/`cleanup_all` whose exit must not be
    /// promoted to `resumable`, even if a token was captured.
    pending_discard: RwLock<HashSet<String>>,
    sessions_dir: PathBuf,
    uploads_dir: Option<PathBuf>,
    policy: Arc<dyn PolicyProvider>,
    exit_sender: mpsc::UnboundedSender<String>,
    exit_notify: broadcast::Sender<SessionMetadata>,
}

/// Owns the live/resumable split described for the core's session
/// registry component. Cheap to clone — every clone shares the same
/// maps and background exit-handling task.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    pub fn new(sessions_dir: PathBuf, policy: Arc<dyn PolicyProvider>) -> Self {
        Self::with_uploads_dir(sessions_dir, None, policy)
    }

    /// Like [`Self::new`], additionally wiring a base uploads directory
    /// (`<state_root>/uploads`) so each session's per-session upload
    /// subdirectory is removed as part of its exit protocol.
    pub fn with_uploads_dir(
        sessions_dir: PathBuf,
        uploads_dir: Option<PathBuf>,
        policy: Arc<dyn PolicyProvider>,
    ) -> Self {
        let (exit_sender, exit_receiver) = mpsc::unbounded_channel();
        let (exit_notify, _) = broadcast::channel(EXIT_NOTIFY_CAPACITY);

        let resumable = persistence::load_all(&sessions_dir)
            .into_iter()
            .map(|meta| (meta.name.clone(), meta))
            .collect();

        let inner = Arc::new(Inner {
            live: RwLock::new(HashMap::new()),
            resumable: RwLock::new(resumable),
            pending_discard: RwLock::new(HashSet::new()),
            sessions_dir,
            uploads_dir,
            policy,
            exit_sender,
            exit_notify,
        });

        tokio::spawn(run_exit_listener(inner.clone(), exit_receiver));

        Self { inner }
    }

    /// Every exited session's final projection, broadcast once the
    /// exit protocol's live/resumable disposition has been decided.
    /// Used by callers that need to react to a session's death beyond
    /// the live/resumable split itself — e.g. finalizing a worktree.
    pub fn subscribe_exits(&self) -> broadcast::Receiver<SessionMetadata> {
        self.inner.exit_notify.subscribe()
    }

    fn validate_name(name: &str) -> Result<()> {
        if NAME_PATTERN.is_match(name) {
            Ok(())
        } else {
            Err(RegistryError::InvalidName(name.to_string()))
        }
    }

    /// Checks the dashboard whitelist. CLI-originated requests always
    /// pass, matching the source's CLI-bypasses-whitelist design.
    fn check_policy_gate(&self, source: CreateSource, base_token: &str) -> Result<()> {
        if source == CreateSource::Cli {
            return Ok(());
        }
        match self.inner.policy.get(base_token) {
            Some(_) => Ok(()),
            None => Err(RegistryError::Core(conductor_core::CoreError::PolicyRejected(
                base_token.to_string(),
            ))),
        }
    }

    pub async fn create(&self, req: CreateRequest) -> Result<Session> {
        Self::validate_name(&req.name)?;

        let tokens = conductor_core::config::shlex_split(&req.command)?;
        let base_token = tokens.first().cloned().unwrap_or_default();
        self.check_policy_gate(req.source, &base_token)?;
        let policy = self.inner.policy.get(&base_token);

        // Name uniqueness: evict a non-running live entry with the
        // same name, and drop any resumable entry with the same name.
        {
            let mut live = self.inner.live.write().await;
            if let Some(existing) = live.get(&req.name) {
                let status = existing.status().await;
                if status.is_terminal() {
                    live.remove(&req.name);
                } else {
                    return Err(RegistryError::Core(conductor_core::CoreError::Other(
                        format!("session `{}` is already live", req.name),
                    )));
                }
            }
        }
        {
            let mut resumable = self.inner.resumable.write().await;
            if let Some(dropped) = resumable.remove(&req.name) {
                persistence::delete(&self.inner.sessions_dir, &dropped.id);
            }
        }

        let resize_source = match req.source {
            CreateSource::Cli => Some(ResizeSource::Cli),
            CreateSource::Dashboard => Some(ResizeSource::Dashboard),
        };

        let session_id = req.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let uploads_dir = self
            .inner
            .uploads_dir
            .as_deref()
            .map(|base| uploads_dir_for(base, &session_id));

        let session = Session::start(
            session_id,
            req.name.clone(),
            req.command.clone(),
            req.cwd,
            req.env,
            req.rows,
            req.cols,
            resize_source,
            policy,
            uploads_dir,
            self.inner.exit_sender.clone(),
        )
        .await?;

        self.inner
            .live
            .write()
            .await
            .insert(req.name.clone(), session.clone());

        info!(session = %req.name, command = %req.command, "session created");
        Ok(session)
    }

    /// Resumes a previously-exited session under a new name-identical
    /// session: either via the policy's `resume_command`, or by
    /// stripping any existing `<resume_flag> <token>` from the
    /// original command and appending the new token.
    pub async fn resume(&self, name: &str) -> Result<Session> {
        let meta = self.take_resumable_metadata(name).await?;

        let base_token = conductor_core::config::shlex_split(&meta.command)?
            .first()
            .cloned()
            .unwrap_or_default();
        let policy = self.inner.policy.get(&base_token);

        let resume_id = meta
            .resume_id
            .clone()
            .ok_or_else(|| RegistryError::NotResumable(name.to_string()))?;

        let command = match policy.as_ref().and_then(|p| p.resume_command.as_ref()) {
            Some(resume_command) => resume_command.clone(),
            None => {
                let flag = meta
                    .resume_flag
                    .clone()
                    .or_else(|| policy.as_ref().and_then(|p| p.resume_flag.clone()))
                    .unwrap_or_else(|| "--resume".to_string());
                let stripped = strip_existing_resume_flag(&meta.command, &flag);
                format!("{stripped} {flag} {resume_id}")
            }
        };

        self.create(CreateRequest {
            name: name.to_string(),
            command,
            cwd: meta.cwd.clone(),
            env: HashMap::new(),
            rows: meta.rows,
            cols: meta.cols,
            source: CreateSource::Cli,
            id: None,
        })
        .await
    }

    /// Finds a session eligible for resume: the `resumable` map, or
    /// (narrow race window) a `live` session that has already exited
    /// and captured a token but whose exit callback hasn't migrated
    /// it yet.
    async fn take_resumable_metadata(&self, name: &str) -> Result<SessionMetadata> {
        if let Some(meta) = self.inner.resumable.write().await.remove(name) {
            persistence::delete(&self.inner.sessions_dir, &meta.id);
            return Ok(meta);
        }
        if let Some(session) = self.inner.live.read().await.get(name) {
            let meta = session.metadata().await;
            if meta.is_resumable() {
                return Ok(meta);
            }
        }
        Err(RegistryError::NotResumable(name.to_string()))
    }

    /// Hard-kills a live session and deletes its metadata; the
    /// session is never promoted to `resumable` even if it would
    /// otherwise have captured a token.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let session = {
            let live = self.inner.live.read().await;
            live.get(name).cloned()
        };
        let Some(session) = session else {
            return Err(RegistryError::NotFound(name.to_string()));
        };
        self.inner
            .pending_discard
            .write()
            .await
            .insert(name.to_string());
        session.kill().await;
        Ok(())
    }

    /// Runs the stop sequence; the exit callback promotes the session
    /// to `resumable` iff it captures a token.
    pub async fn graceful_stop(&self, name: &str, timeout: std::time::Duration) -> Result<()> {
        let session = {
            let live = self.inner.live.read().await;
            live.get(name).cloned()
        };
        match session {
            Some(session) => {
                session.interrupt(timeout).await;
                Ok(())
            }
            None => Err(RegistryError::NotFound(name.to_string())),
        }
    }

    pub async fn dismiss_resumable(&self, name: &str) -> Result<()> {
        let meta = self
            .inner
            .resumable
            .write()
            .await
            .remove(name)
            .ok_or_else(|| RegistryError::NotResumable(name.to_string()))?;
        persistence::delete(&self.inner.sessions_dir, &meta.id);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Session> {
        self.inner.live.read().await.get(name).cloned()
    }

    /// The session IDs (not names) of every entry currently in `live`,
    /// regardless of status — used by the worktree manager to gate
    /// `remove`/`merge`/`gc` against sessions that still own a worktree.
    pub async fn live_session_ids(&self) -> HashSet<String> {
        self.inner
            .live
            .read()
            .await
            .values()
            .map(|s| s.id().to_string())
            .collect()
    }

    pub async fn list_all(&self) -> Vec<SessionMetadata> {
        let mut out = Vec::new();
        {
            let live = self.inner.live.read().await;
            for session in live.values() {
                out.push(session.metadata().await);
            }
        }
        {
            let resumable = self.inner.resumable.read().await;
            out.extend(resumable.values().cloned());
        }
        out
    }

    /// Hard-removes every live session; used on daemon shutdown.
    pub async fn cleanup_all(&self) {
        let names: Vec<String> = self.inner.live.read().await.keys().cloned().collect();
        for name in names {
            let _ = self.remove(&name).await;
        }
    }
}

async fn run_exit_listener(inner: Arc<Inner>, mut exit_receiver: mpsc::UnboundedReceiver<String>) {
    while let Some(name) = exit_receiver.recv().await {
        let session = inner.live.write().await.remove(&name);
        let Some(session) = session else { continue };
        let meta = session.metadata().await;

        let discarded = inner.pending_discard.write().await.remove(&name);
        let _ = inner.exit_notify.send(meta.clone());

        if discarded {
            persistence::delete(&inner.sessions_dir, &meta.id);
            continue;
        }

        if meta.is_resumable() {
            if let Err(e) = persistence::save(&inner.sessions_dir, &meta) {
                tracing::warn!(session = %name, error = %e, "failed to persist resumable session");
            }
            inner.resumable.write().await.insert(name.clone(), meta);
            info!(session = %name, "session exited and is now resumable");
        } else {
            persistence::delete(&inner.sessions_dir, &meta.id);
            info!(session = %name, "session exited, no resume token captured");
        }
    }
}

/// Removes any existing `<flag> <token>` occurrence from `command` so
/// repeated resumes don't accumulate `--resume X --resume Y`.
fn strip_existing_resume_flag(command: &str, flag: &str) -> String {
    let pattern = format!(r"\s*{}\s+\S+", regex::escape(flag));
    let re = Regex::new(&pattern).expect("generated regex is valid");
    re.replace_all(command, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_existing_resume_flag_removes_prior_token() {
        let command = "claude --resume abc-123 --verbose";
        assert_eq!(
            strip_existing_resume_flag(command, "--resume"),
            "claude --verbose"
        );
    }

    #[test]
    fn strip_existing_resume_flag_is_noop_when_absent() {
        let command = "claude --verbose";
        assert_eq!(strip_existing_resume_flag(command, "--resume"), command);
    }

    fn policy_with_claude() -> Arc<dyn PolicyProvider> {
        Arc::new(conductor_core::StaticPolicyProvider::with_defaults())
    }

    #[tokio::test]
    async fn create_rejects_duplicate_live_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf(), policy_with_claude());

        registry
            .create(CreateRequest {
                name: "dup".to_string(),
                command: "sleep 5".to_string(),
                cwd: std::env::temp_dir(),
                env: HashMap::new(),
                rows: 24,
                cols: 80,
                source: CreateSource::Cli,
                id: None,
            })
            .await
            .expect("first create should succeed");

        let second = registry
            .create(CreateRequest {
                name: "dup".to_string(),
                command: "sleep 5".to_string(),
                cwd: std::env::temp_dir(),
                env: HashMap::new(),
                rows: 24,
                cols: 80,
                source: CreateSource::Cli,
                id: None,
            })
            .await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn exited_session_without_token_is_not_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf(), policy_with_claude());

        registry
            .create(CreateRequest {
                name: "no-token".to_string(),
                command: "true".to_string(),
                cwd: std::env::temp_dir(),
                env: HashMap::new(),
                rows: 24,
                cols: 80,
                source: CreateSource::Cli,
                id: None,
            })
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;

        let all = registry.list_all().await;
        assert!(all.iter().all(|m| m.name != "no-token" || !m.is_resumable()));
    }

    #[tokio::test]
    async fn remove_discards_even_if_a_token_would_be_captured() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf(), policy_with_claude());

        registry
            .create(CreateRequest {
                name: "discard-me".to_string(),
                command: "sleep 5".to_string(),
                cwd: std::env::temp_dir(),
                env: HashMap::new(),
                rows: 24,
                cols: 80,
                source: CreateSource::Cli,
                id: None,
            })
            .await
            .unwrap();

        registry.remove("discard-me").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert!(registry.dismiss_resumable("discard-me").await.is_err());
    }
}
