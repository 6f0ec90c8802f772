// Remote session - lifecycle of one telemetry process against one target
//
// State machine:
//   Idle -> Connecting -> Streaming -> Stopping -> Idle
//   Connecting / Streaming -> Failed (transport error) -> Connecting (retry)
//
// Everything that can be validated locally (rates, command template, pipeline
// limits) is checked in `prepare`, before any transport is touched. The sample
// ring and counters belong to the session, so a retry keeps the history.
// The state is published through a `StateCell` so readers never wait for a
// start or stop that is in progress.

use crate::config::PipelineConfig;
use crate::streaming::buffer::{BufferView, SampleRingBuffer};
use crate::streaming::ingest::{IngestConfig, IngestWorker, WorkerStatus};
use crate::streaming::metrics::IngestCounters;
use crate::streaming::rate::{RateConfig, RatePlan};
use crate::streaming::sample::{ChannelMode, SampleDecoder};
use crate::streaming::source::{
    LineStream, ProcessHandle, RemoteProcess, RemoteTarget, StderrTail, Termination, Transport,
};
use crate::streaming::types::{MetricsSnapshot, SessionState, StreamError, StreamResult};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const STDERR_SETTLE: Duration = Duration::from_millis(500);

/// Resources of one running process and its ingest task
struct ActiveRun {
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    status: watch::Receiver<WorkerStatus>,
    process: ProcessHandle,
    stderr: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.worker.abort();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Shared, cheaply readable session state
#[derive(Clone, Default)]
pub struct StateCell {
    inner: Arc<RwLock<Published>>,
}

#[derive(Default)]
struct Published {
    state: SessionState,
    worker: Option<watch::Receiver<WorkerStatus>>,
}

impl StateCell {
    /// Current state; a streaming session whose worker hit a transport
    /// error reports Failed
    pub fn current(&self) -> SessionState {
        let published = self.inner.read();
        if published.state.is_streaming() {
            if let Some(worker) = &published.worker {
                if let WorkerStatus::Failed(message) = &*worker.borrow() {
                    return SessionState::Failed {
                        message: message.clone(),
                    };
                }
            }
        }
        published.state.clone()
    }

    fn set(&self, state: SessionState) {
        let mut published = self.inner.write();
        published.state = state;
        published.worker = None;
    }

    fn set_streaming(&self, started_at: f64, worker: watch::Receiver<WorkerStatus>) {
        let mut published = self.inner.write();
        published.state = SessionState::Streaming { started_at };
        published.worker = Some(worker);
    }
}

pub struct RemoteSession {
    id: String,
    target: RemoteTarget,
    mode: ChannelMode,
    plan: RatePlan,
    command: String,
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
    view: BufferView,
    counters: Arc<IngestCounters>,
    state: StateCell,
    run: Option<ActiveRun>,
}

impl RemoteSession {
    /// Validate everything and build an idle session. Never opens a transport.
    pub fn prepare(
        target: RemoteTarget,
        rates: RateConfig,
        mode: ChannelMode,
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
    ) -> StreamResult<Self> {
        config.validate()?;
        let plan = rates.plan()?;
        let command = config.command.render(&plan, mode, &target)?;

        let (_writer, view) = SampleRingBuffer::new(config.buffer_capacity);

        log::debug!(
            "Prepared session for {}: {} Hz device, stream every {} ({:.3} Hz), record every {} ({:.3} Hz), {}",
            target,
            plan.device_hz,
            plan.stream.factor,
            plan.stream.effective_hz,
            plan.record.factor,
            plan.record.effective_hz,
            mode
        );

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            mode,
            plan,
            command,
            config,
            transport,
            view,
            counters: Arc::new(IngestCounters::new()),
            state: StateCell::default(),
            run: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn plan(&self) -> &RatePlan {
        &self.plan
    }

    /// The rendered remote command
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// Handle for reading the state from outside the session's owner
    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Read-only view of the sample ring
    pub fn subscribe(&self) -> BufferView {
        self.view.clone()
    }

    pub(crate) fn counters(&self) -> Arc<IngestCounters> {
        Arc::clone(&self.counters)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let ring = self.view.get_metrics();
        self.counters.snapshot(ring.total_evicted, ring.current_size)
    }

    /// Launch the process and start ingesting. Allowed from Idle or Failed.
    pub async fn start(&mut self) -> StreamResult<()> {
        let state = self.state();
        if !state.is_rest() {
            return Err(StreamError::AlreadyRunning(self.target.key()));
        }

        // A failed run may still hold a live process
        if let Some(run) = self.run.take() {
            self.shutdown(run).await;
        }

        log::info!(
            "Starting session {} on {} via {}",
            self.id,
            self.target,
            self.transport.name()
        );
        self.state.set(SessionState::Connecting);

        match self.connect().await {
            Ok(run) => {
                self.state.set_streaming(
                    chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
                    run.status.clone(),
                );
                self.run = Some(run);
                log::info!("Session {} streaming", self.id);
                Ok(())
            }
            Err(e) => {
                log::error!("Session {} failed to start: {}", self.id, e);
                self.state.set(SessionState::Failed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Explicit restart after a failure
    pub async fn retry(&mut self) -> StreamResult<()> {
        match self.state() {
            SessionState::Failed { message } => {
                log::info!("Retrying session {} after: {}", self.id, message);
                self.start().await
            }
            SessionState::Idle => self.start().await,
            _ => Err(StreamError::AlreadyRunning(self.target.key())),
        }
    }

    /// Stop ingest and terminate the process. Always ends Idle; idempotent.
    ///
    /// Bounded by roughly twice the stop timeout even if the remote side
    /// ignores every signal.
    pub async fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            self.state.set(SessionState::Idle);
            return;
        };

        log::info!("Stopping session {}", self.id);
        self.state.set(SessionState::Stopping);
        self.shutdown(run).await;
        self.state.set(SessionState::Idle);
        log::info!("Session {} stopped", self.id);
    }

    async fn shutdown(&self, mut run: ActiveRun) {
        let grace = self.config.stop_timeout();

        // Worker first: once it is joined nothing can append to the ring
        run.cancel.cancel();
        if tokio::time::timeout(grace, &mut run.worker).await.is_err() {
            log::warn!("Session {}: ingest task did not stop, aborting", self.id);
            run.worker.abort();
            let _ = (&mut run.worker).await;
        }

        match run.process.terminate(grace).await {
            Termination::Killed => {
                log::warn!("Session {}: process had to be killed", self.id)
            }
            other => log::debug!("Session {}: process ended ({:?})", self.id, other),
        }

        let tail = run.stderr.settle(run.stderr_task.take(), STDERR_SETTLE).await;
        if !tail.is_empty() {
            log::debug!("Session {} stderr tail:\n{}", self.id, tail);
        }
    }

    async fn connect(&self) -> StreamResult<ActiveRun> {
        let connect_timeout = self.config.connect_timeout();
        let deadline = Instant::now() + connect_timeout;

        let launch = self.transport.launch(&self.target, &self.command);
        let RemoteProcess {
            mut lines,
            handle,
            stderr,
            stderr_task,
        } = match tokio::time::timeout_at(deadline, launch).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StreamError::Connection(format!(
                    "timed out launching on {} after {:?}",
                    self.target, connect_timeout
                )))
            }
        };
        lines.set_max_line_bytes(self.config.max_line_bytes);

        let mut pending = Pending {
            handle,
            stderr,
            stderr_task,
        };

        let first_line = match self.handshake(&mut lines, deadline).await {
            Ok(line) => line,
            Err(e) => {
                let detail = pending.abandon(self.config.stop_timeout()).await;
                return Err(with_detail(e, &detail));
            }
        };

        let decimate = if self.config.local_decimation {
            self.plan.stream.factor
        } else {
            1
        };
        let worker = IngestWorker::new(
            format!("{} {}", &self.id[..8.min(self.id.len())], self.target),
            SampleDecoder::new(self.mode),
            self.view.writer(),
            Arc::clone(&self.counters),
            IngestConfig {
                decimate,
                throughput_window: self.config.throughput_window(),
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let (worker, status) = worker.spawn(lines, first_line, cancel.clone());

        Ok(ActiveRun {
            cancel,
            worker,
            status,
            process: pending.handle,
            stderr: pending.stderr,
            stderr_task: pending.stderr_task,
        })
    }

    /// Wait for the first sign of life from the process.
    ///
    /// Returns the first line so the worker can ingest it. A first line that
    /// is not valid text still proves the stream is up; it is counted as a
    /// drop and the worker starts without it.
    async fn handshake(
        &self,
        lines: &mut LineStream,
        deadline: Instant,
    ) -> StreamResult<Option<String>> {
        loop {
            let pulled = match tokio::time::timeout_at(deadline, lines.next_line()).await {
                Ok(pulled) => pulled,
                Err(_) => {
                    return Err(StreamError::Connection(format!(
                        "timed out: no data from {} within {:?}",
                        self.target,
                        self.config.connect_timeout()
                    )))
                }
            };

            match pulled {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(line)),
                Ok(None) => {
                    return Err(StreamError::Connection(format!(
                        "process on {} exited before sending data",
                        self.target
                    )))
                }
                Err(e) if e.is_recoverable() => {
                    self.counters.record_line();
                    self.counters.record_drop();
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A launched process that has not been handed to a worker yet
struct Pending {
    handle: ProcessHandle,
    stderr: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl Pending {
    /// Tear down a failed launch and collect whatever it printed
    async fn abandon(&mut self, grace: Duration) -> String {
        let termination = self.handle.terminate(grace).await;
        let tail = self.stderr.settle(self.stderr_task.take(), STDERR_SETTLE).await;
        log::debug!("Abandoned launch of {} ({:?})", self.handle.label(), termination);
        tail
    }
}

fn with_detail(error: StreamError, detail: &str) -> StreamError {
    if detail.is_empty() {
        return error;
    }
    match error {
        StreamError::Connection(msg) => StreamError::Connection(format!("{}: {}", msg, detail)),
        other => other,
    }
}
