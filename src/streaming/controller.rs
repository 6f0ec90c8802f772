// Telemetry hub - the surface the UI and persistence layers talk to
//
// Keeps one `RemoteSession` per active target, keyed by a generated id.
// Buffer views, counters and the published state are kept next to each
// session so `subscribe`, `get_metrics`, `session_state` and `sessions` never
// wait behind a session that is starting or stopping.

use crate::config::PipelineConfig;
use crate::streaming::buffer::BufferView;
use crate::streaming::metrics::IngestCounters;
use crate::streaming::rate::{RateConfig, RatePlan};
use crate::streaming::sample::ChannelMode;
use crate::streaming::session::{RemoteSession, StateCell};
use crate::streaming::source::{RemoteTarget, SshTransport, Transport};
use crate::streaming::types::{MetricsSnapshot, SessionState, StreamError, StreamResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Caller's reference to a started session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: String,
    pub target: String,
}

/// Summary row for `sessions()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub handle: SessionHandle,
    pub state: SessionState,
    pub mode: String,
    pub plan: RatePlan,
    pub command: String,
}

struct SessionEntry {
    target_key: String,
    view: BufferView,
    counters: Arc<IngestCounters>,
    plan: RatePlan,
    mode: ChannelMode,
    command: String,
    state: StateCell,
    session: Arc<Mutex<RemoteSession>>,
}

impl SessionEntry {
    fn handle(&self, id: &str) -> SessionHandle {
        SessionHandle {
            id: id.to_string(),
            target: self.target_key.clone(),
        }
    }

    fn info(&self, id: &str) -> SessionInfo {
        SessionInfo {
            handle: self.handle(id),
            state: self.state.current(),
            mode: self.mode.to_string(),
            plan: self.plan,
            command: self.command.clone(),
        }
    }
}

pub struct TelemetryHub {
    transport: Arc<dyn Transport>,
    config: PipelineConfig,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl TelemetryHub {
    pub fn new(transport: Arc<dyn Transport>, config: PipelineConfig) -> Self {
        Self {
            transport,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Hub that reaches targets through the system ssh client
    pub fn with_ssh(config: PipelineConfig) -> StreamResult<Self> {
        let transport = match &config.ssh_binary {
            Some(binary) => SshTransport::with_binary(binary.clone()),
            None => SshTransport::new()?,
        }
        .connect_timeout(config.connect_timeout());

        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate, launch and register a session for `target`.
    ///
    /// Configuration problems fail before the transport is used. A session
    /// that fails to connect is not registered.
    pub async fn start_session(
        &self,
        target: RemoteTarget,
        rates: RateConfig,
        mode: ChannelMode,
    ) -> StreamResult<SessionHandle> {
        let session = RemoteSession::prepare(
            target,
            rates,
            mode,
            self.config.clone(),
            Arc::clone(&self.transport),
        )?;

        let id = session.id().to_string();
        let target_key = session.target().key();

        self.evict_resting(&target_key).await?;

        let entry = SessionEntry {
            target_key: target_key.clone(),
            view: session.subscribe(),
            counters: session.counters(),
            plan: *session.plan(),
            mode: session.mode(),
            command: session.command().to_string(),
            state: session.state_cell(),
            session: Arc::new(Mutex::new(session)),
        };
        let session = Arc::clone(&entry.session);

        // Reserve the target before connecting so concurrent starts collide
        {
            let mut sessions = self.sessions.write();
            if sessions.values().any(|e| e.target_key == target_key) {
                return Err(StreamError::AlreadyRunning(target_key));
            }
            sessions.insert(id.clone(), entry);
        }

        let started = session.lock().await.start().await;
        if let Err(e) = started {
            self.sessions.write().remove(&id);
            return Err(e);
        }

        log::info!("Session {} registered for {}", id, target_key);
        Ok(SessionHandle {
            id,
            target: target_key,
        })
    }

    /// Stop and forget a session. Unknown handles are ignored.
    pub async fn stop_session(&self, handle: &SessionHandle) {
        let Some(session) = self.session(&handle.id) else {
            log::debug!("stop_session: {} already gone", handle.id);
            return;
        };

        session.lock().await.stop().await;
        self.sessions.write().remove(&handle.id);
    }

    /// Retry a session that has failed (or was left idle)
    pub async fn restart_session(&self, handle: &SessionHandle) -> StreamResult<()> {
        let session = self
            .session(&handle.id)
            .ok_or_else(|| StreamError::SessionNotFound(handle.id.clone()))?;
        let result = session.lock().await.retry().await;
        result
    }

    pub fn subscribe(&self, handle: &SessionHandle) -> StreamResult<BufferView> {
        self.with_entry(handle, |e| e.view.clone())
    }

    pub fn get_metrics(&self, handle: &SessionHandle) -> StreamResult<MetricsSnapshot> {
        self.with_entry(handle, |e| {
            let ring = e.view.get_metrics();
            e.counters.snapshot(ring.total_evicted, ring.current_size)
        })
    }

    pub fn rate_plan(&self, handle: &SessionHandle) -> StreamResult<RatePlan> {
        self.with_entry(handle, |e| e.plan)
    }

    /// Current state, including Connecting and Stopping while a transition runs
    pub fn session_state(&self, handle: &SessionHandle) -> StreamResult<SessionState> {
        self.with_entry(handle, |e| e.state.current())
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .iter()
            .map(|(id, e)| e.info(id))
            .collect()
    }

    /// Stop every session, e.g. on shutdown
    pub async fn stop_all(&self) {
        let handles: Vec<SessionHandle> = self
            .sessions
            .read()
            .iter()
            .map(|(id, e)| e.handle(id))
            .collect();

        for handle in handles {
            self.stop_session(&handle).await;
        }
    }

    fn session(&self, id: &str) -> Option<Arc<Mutex<RemoteSession>>> {
        self.sessions
            .read()
            .get(id)
            .map(|e| Arc::clone(&e.session))
    }

    fn with_entry<T>(
        &self,
        handle: &SessionHandle,
        f: impl FnOnce(&SessionEntry) -> T,
    ) -> StreamResult<T> {
        self.sessions
            .read()
            .get(&handle.id)
            .map(f)
            .ok_or_else(|| StreamError::SessionNotFound(handle.id.clone()))
    }

    /// A failed or idle session no longer counts as active for its target;
    /// drop it so a fresh one can take its place
    async fn evict_resting(&self, target_key: &str) -> StreamResult<()> {
        let existing = self
            .sessions
            .read()
            .iter()
            .find(|(_, e)| e.target_key == target_key)
            .map(|(id, e)| (id.clone(), e.state.current(), Arc::clone(&e.session)));

        let Some((id, state, session)) = existing else {
            return Ok(());
        };
        if !state.is_rest() {
            return Err(StreamError::AlreadyRunning(target_key.to_string()));
        }

        let mut session = match session.try_lock() {
            Ok(session) => session,
            // Held by a start or stop in progress
            Err(_) => return Err(StreamError::AlreadyRunning(target_key.to_string())),
        };
        if !session.state().is_rest() {
            return Err(StreamError::AlreadyRunning(target_key.to_string()));
        }

        log::info!("Replacing resting session {} for {}", id, target_key);
        session.stop().await;
        drop(session);
        self.sessions.write().remove(&id);
        Ok(())
    }
}
