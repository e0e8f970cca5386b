//! The session engine: one PTY, a rolling output buffer, a set of
//! byte-queue subscribers, an exit monitor, and the graceful/hard stop
//! state machine.

use crate::ansi::extract_resume_id;
use crate::error::Result;
use crate::pty::{PlatformPtyAdapter, PtyAdapter, PtySizeSpec, SpawnSpec};
use bytes::Bytes;
use conductor_types::{
    CommandPolicyRecord, ResizeSource, SessionMetadata, SessionStatus, BUFFER_MAX_BYTES,
    SUBSCRIBER_QUEUE_CAPACITY,
};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Duration;
use tracing::{debug, warn};

/// Byte window scanned for a resume token once the child has exited.
const RESUME_TOKEN_TAIL_BYTES: usize = 4096;

/// How long the exit-monitor waits after observing an exit code
/// before it snapshots the buffer for resume-token extraction, giving
/// in-flight readable callbacks a chance to land.
const EXIT_DRAIN_SETTLE: Duration = Duration::from_millis(100);

const READ_TICK: Duration = Duration::from_millis(50);
const POLL_TICK: Duration = Duration::from_millis(500);

const EXIT_SENTINEL_TEXT: &[u8] = b"\r\n[Process exited]\r\n";

enum Control {
    Interrupt { timeout: Duration },
    Kill,
}

enum InputMsg {
    Bytes(Vec<u8>),
    Resize(PtySizeSpec, Option<ResizeSource>),
}

struct MutableState {
    status: SessionStatus,
    pid: Option<u32>,
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    exit_code: Option<i32>,
    rows: u16,
    cols: u16,
    resize_source: Option<ResizeSource>,
    resume_id: Option<String>,
}

struct Shared {
    id: String,
    name: String,
    command: String,
    cwd: PathBuf,
    created_at: chrono::DateTime<chrono::Utc>,
    policy: Option<CommandPolicyRecord>,
    uploads_dir: Option<PathBuf>,
    state: RwLock<MutableState>,
    buffer: RwLock<VecDeque<u8>>,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<Option<Bytes>>>>,
    next_subscriber_id: AtomicU64,
}

impl Shared {
    async fn metadata(&self) -> SessionMetadata {
        let state = self.state.read().await;
        SessionMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            status: state.status,
            pid: state.pid,
            start_time: state.start_time,
            created_at: self.created_at,
            exit_code: state.exit_code,
            rows: state.rows,
            cols: state.cols,
            resize_source: state.resize_source,
            resume_id: state.resume_id.clone(),
            resume_flag: self.policy.as_ref().and_then(|p| p.resume_flag.clone()),
            resume_command: self.policy.as_ref().and_then(|p| p.resume_command.clone()),
        }
    }
}

/// A handle to a live session. Cheap to clone; every clone refers to
/// the same underlying event loop.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    input_tx: mpsc::Sender<InputMsg>,
    control_tx: mpsc::Sender<Control>,
}

impl Session {
    /// Spawns the PTY and the event-loop task. `exit_tx` receives this
    /// session's name exactly once, after the exit protocol has fully
    /// run (status settled, resume token extracted, sentinel
    /// broadcast) — the registry uses it to move the session from
    /// `live` into `resumable` or delete its metadata.
    pub async fn start(
        id: String,
        name: String,
        command: String,
        cwd: PathBuf,
        env: HashMap<String, String>,
        rows: u16,
        cols: u16,
        resize_source: Option<ResizeSource>,
        policy: Option<CommandPolicyRecord>,
        uploads_dir: Option<PathBuf>,
        exit_tx: mpsc::UnboundedSender<String>,
    ) -> Result<Self> {
        let spawn_spec = SpawnSpec {
            command: command.clone(),
            cwd: cwd.clone(),
            env,
            size: PtySizeSpec { rows, cols },
        };

        let adapter: Box<dyn PtyAdapter> = Box::new(PlatformPtyAdapter::spawn(spawn_spec)?);

        let pid = adapter.pid();
        let now = chrono::Utc::now();

        let shared = Arc::new(Shared {
            id,
            name,
            command,
            cwd,
            created_at: now,
            policy,
            uploads_dir,
            state: RwLock::new(MutableState {
                status: SessionStatus::Running,
                pid,
                start_time: Some(now),
                exit_code: None,
                rows,
                cols,
                resize_source,
                resume_id: None,
            }),
            buffer: RwLock::new(VecDeque::with_capacity(BUFFER_MAX_BYTES.min(1 << 20))),
            subscribers: RwLock::new(HashMap::new()),
            next_subscriber_id: AtomicU64::new(0),
        });

        let (input_tx, input_rx) = mpsc::channel(256);
        let (control_tx, control_rx) = mpsc::channel(16);

        tokio::spawn(run_event_loop(
            adapter,
            shared.clone(),
            input_rx,
            control_rx,
            input_tx.clone(),
            control_tx.clone(),
            exit_tx,
        ));

        Ok(Self {
            shared,
            input_tx,
            control_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub async fn status(&self) -> SessionStatus {
        self.shared.state.read().await.status
    }

    pub async fn metadata(&self) -> SessionMetadata {
        self.shared.metadata().await
    }

    pub async fn get_buffer(&self) -> Vec<u8> {
        self.shared.buffer.read().await.iter().copied().collect()
    }

    /// Registers a fresh subscriber queue. Callers MUST call
    /// `get_buffer()` immediately after to replay history — this
    /// method only guarantees bytes written from this point forward.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<Option<Bytes>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.shared.subscribers.write().await.remove(&id);
    }

    pub async fn send_input(&self, bytes: Vec<u8>) {
        let _ = self.input_tx.send(InputMsg::Bytes(bytes)).await;
    }

    pub async fn resize(&self, rows: u16, cols: u16, source: Option<ResizeSource>) {
        let _ = self
            .input_tx
            .send(InputMsg::Resize(PtySizeSpec { rows, cols }, source))
            .await;
    }

    /// Graceful stop: runs the policy stop sequence (or a bare
    /// `SIGINT`/`0x03`) and arms an escalation timer that hard-kills
    /// after `timeout` if the process is still alive.
    pub async fn interrupt(&self, timeout: Duration) {
        let _ = self.control_tx.send(Control::Interrupt { timeout }).await;
    }

    pub async fn kill(&self) {
        let _ = self.control_tx.send(Control::Kill).await;
    }
}

async fn append_and_broadcast(shared: &Shared, chunk: &[u8]) {
    {
        let mut buffer = shared.buffer.write().await;
        buffer.extend(chunk.iter().copied());
        let overflow = buffer.len().saturating_sub(BUFFER_MAX_BYTES);
        if overflow > 0 {
            buffer.drain(0..overflow);
        }
    }
    broadcast_bytes(shared, chunk).await;
}

async fn broadcast_bytes(shared: &Shared, chunk: &[u8]) {
    if chunk.is_empty() {
        return;
    }
    let bytes = Bytes::copy_from_slice(chunk);
    let subscribers = shared.subscribers.read().await;
    for tx in subscribers.values() {
        if tx.try_send(Some(bytes.clone())).is_err() {
            // Full queue: drop this chunk for this subscriber only.
        }
    }
}

async fn broadcast_close(shared: &Shared) {
    let subscribers = shared.subscribers.read().await;
    for tx in subscribers.values() {
        let _ = tx.try_send(None);
    }
}

/// Writes `stop_sequence` items immediately for the first item, then
/// 2.0s before the second item and 0.2s before each one after that —
/// the first item is typically Ctrl-C, and the agent needs a full
/// prompt cycle before it'll accept a follow-up item like `/exit`.
/// Bails out early once the session leaves `stopping`.
async fn run_stop_sequence(
    input_tx: mpsc::Sender<InputMsg>,
    shared: Arc<Shared>,
    sequence: Vec<String>,
) {
    for (i, item) in sequence.iter().enumerate() {
        if i > 0 {
            let delay = if i == 1 {
                Duration::from_millis(2000)
            } else {
                Duration::from_millis(200)
            };
            tokio::time::sleep(delay).await;
        }
        {
            let status = shared.state.read().await.status;
            if status.is_terminal() {
                return;
            }
        }
        if input_tx
            .send(InputMsg::Bytes(item.clone().into_bytes()))
            .await
            .is_err()
        {
            return;
        }
    }
}

async fn run_escalation_timer(control_tx: mpsc::Sender<Control>, shared: Arc<Shared>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let status = shared.state.read().await.status;
    if status == SessionStatus::Stopping {
        warn!(session = %shared.name, "graceful stop timed out, escalating to kill");
        let _ = control_tx.send(Control::Kill).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    mut adapter: Box<dyn PtyAdapter>,
    shared: Arc<Shared>,
    mut input_rx: mpsc::Receiver<InputMsg>,
    mut control_rx: mpsc::Receiver<Control>,
    input_tx: mpsc::Sender<InputMsg>,
    control_tx: mpsc::Sender<Control>,
    exit_tx: mpsc::UnboundedSender<String>,
) {
    let mut read_interval = tokio::time::interval(READ_TICK);
    let mut poll_interval = tokio::time::interval(POLL_TICK);
    let mut was_killed = false;
    let exit_code;

    loop {
        tokio::select! {
            _ = read_interval.tick() => {
                match adapter.read().await {
                    Ok(bytes) if !bytes.is_empty() => append_and_broadcast(&shared, &bytes).await,
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "pty read error"),
                }
            }
            _ = poll_interval.tick() => {
                if let Some(code) = adapter.poll() {
                    exit_code = Some(code);
                    break;
                }
            }
            msg = input_rx.recv() => {
                match msg {
                    Some(InputMsg::Bytes(data)) => { let _ = adapter.write(&data).await; }
                    Some(InputMsg::Resize(size, source)) => {
                        let _ = adapter.resize(size).await;
                        let mut state = shared.state.write().await;
                        state.rows = size.rows;
                        state.cols = size.cols;
                        state.resize_source = source;
                    }
                    None => {}
                }
            }
            ctrl = control_rx.recv() => {
                match ctrl {
                    Some(Control::Interrupt { timeout }) => {
                        let already_stopping = {
                            let mut state = shared.state.write().await;
                            if state.status.is_terminal() || state.status == SessionStatus::Stopping {
                                true
                            } else {
                                state.status = SessionStatus::Stopping;
                                false
                            }
                        };
                        if already_stopping {
                            continue;
                        }
                        let sequence = shared
                            .policy
                            .as_ref()
                            .map(|p| p.stop_sequence.clone())
                            .unwrap_or_default();
                        if sequence.is_empty() {
                            let _ = adapter.interrupt_signal().await;
                        } else {
                            tokio::spawn(run_stop_sequence(input_tx.clone(), shared.clone(), sequence));
                        }
                        tokio::spawn(run_escalation_timer(control_tx.clone(), shared.clone(), timeout));
                    }
                    Some(Control::Kill) => {
                        was_killed = true;
                        let _ = adapter.kill().await;
                        let mut state = shared.state.write().await;
                        if !state.status.is_terminal() {
                            state.status = SessionStatus::Stopping;
                        }
                    }
                    None => {}
                }
            }
        }
    }

    // Step 2: yield briefly so pending readable callbacks drain.
    tokio::time::sleep(EXIT_DRAIN_SETTLE).await;

    // Step 3: final non-blocking drain until the reader reports empty
    // twice in a row.
    let mut consecutive_empty = 0;
    while consecutive_empty < 2 {
        match adapter.read().await {
            Ok(bytes) if !bytes.is_empty() => {
                append_and_broadcast(&shared, &bytes).await;
                consecutive_empty = 0;
            }
            _ => {
                consecutive_empty += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    // Step 4: resume-token extraction over the cleaned tail.
    let resume_id = {
        let buffer = shared.buffer.read().await;
        let bytes: Vec<u8> = buffer.iter().copied().collect();
        let pattern = shared
            .policy
            .as_ref()
            .and_then(|p| p.resume_pattern.as_deref());
        extract_resume_id(&bytes, pattern, RESUME_TOKEN_TAIL_BYTES)
    };

    // Step 5: settle status.
    {
        let mut state = shared.state.write().await;
        state.exit_code = exit_code;
        state.resume_id = resume_id;
        state.status = if was_killed {
            SessionStatus::Killed
        } else {
            SessionStatus::Exited
        };
    }

    // Step 6: sentinel, close, uploads cleanup, notify.
    append_and_broadcast(&shared, EXIT_SENTINEL_TEXT).await;
    broadcast_close(&shared).await;
    let _ = adapter.close().await;
    if let Some(dir) = &shared.uploads_dir {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
    let _ = exit_tx.send(shared.name.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    async fn spawn_echo_session(command: &str) -> (Session, mpsc::UnboundedReceiver<String>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let session = Session::start(
            uuid::Uuid::new_v4().to_string(),
            "test-session".to_string(),
            command.to_string(),
            std::env::temp_dir(),
            HashMap::new(),
            24,
            80,
            None,
            None,
            None,
            exit_tx,
        )
        .await
        .expect("session should spawn");
        (session, exit_rx)
    }

    #[tokio::test]
    async fn buffer_replays_output_to_late_subscribers() {
        let (session, _exit_rx) = spawn_echo_session("echo hello-conductor").await;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let buffer = session.get_buffer().await;
        let text = String::from_utf8_lossy(&buffer);
        assert!(text.contains("hello-conductor"), "buffer was: {text}");
    }

    #[tokio::test]
    async fn exit_protocol_sets_status_and_sentinel() {
        let (session, mut exit_rx) = spawn_echo_session("true").await;
        let (_id, mut rx) = session.subscribe().await;

        let name = timeout(Duration::from_secs(5), exit_rx.recv())
            .await
            .expect("exit notification should arrive")
            .expect("channel should not close early");
        assert_eq!(name, "test-session");

        assert_eq!(session.status().await, SessionStatus::Exited);

        let mut saw_sentinel = false;
        let mut saw_close = false;
        while let Ok(Some(item)) = timeout(Duration::from_secs(1), rx.recv()).await {
            match item {
                Some(bytes) if bytes.ends_with(b"[Process exited]\r\n") => saw_sentinel = true,
                None => {
                    saw_close = true;
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_sentinel, "expected exit sentinel text on the stream");
        assert!(saw_close, "expected a null sentinel to close the stream");
    }

    #[tokio::test]
    async fn kill_sets_killed_status_not_exited() {
        let (session, mut exit_rx) = spawn_echo_session("sleep 30").await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.kill().await;
        let _ = timeout(Duration::from_secs(5), exit_rx.recv()).await;
        assert_eq!(session.status().await, SessionStatus::Killed);
    }
}
