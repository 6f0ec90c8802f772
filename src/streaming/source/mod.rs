// Transports that launch the telemetry process and expose its output
//
// A `Transport` opens whatever session is needed to run a command on the
// target and hands back a `RemoteProcess`: a pull-based `LineStream` over the
// process stdout plus a `ProcessHandle` for lifecycle control. New transports
// are added by implementing the trait; the session manager only depends on it.
//
// Current implementations:
// - SSH: runs the command on a remote host through the system ssh client
// - Local: runs the command through `sh -c` (locally attached sensors, tests)

mod lines;
mod local;
mod ssh;

use crate::streaming::types::{StreamError, StreamResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

pub use lines::{LineStream, DEFAULT_MAX_LINE_BYTES};
pub use local::LocalTransport;
pub use ssh::SshTransport;

/// Where a session's telemetry process runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RemoteTarget {
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Sensor identifier substituted into `{sensor}` in the command template
    #[serde(default)]
    pub sensor: Option<String>,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            sensor: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_sensor(mut self, sensor: impl Into<String>) -> Self {
        self.sensor = Some(sensor.into());
        self
    }

    /// Identity used to enforce one session per target
    pub fn key(&self) -> String {
        let mut key = String::new();
        if let Some(user) = &self.user {
            key.push_str(user);
            key.push('@');
        }
        key.push_str(&self.host);
        if let Some(port) = self.port {
            key.push_str(&format!(":{}", port));
        }
        if let Some(sensor) = &self.sensor {
            key.push('/');
            key.push_str(sensor);
        }
        key
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for RemoteTarget {
    type Err = StreamError;

    /// Parses `[user@]host[:port]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (user, rest) = match s.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => {
                return Err(StreamError::Config(format!("empty user in target '{}'", s)))
            }
            None => (None, s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    StreamError::Config(format!("invalid port '{}' in target '{}'", port, s))
                })?;
                (host, Some(port))
            }
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(StreamError::Config(format!("missing host in target '{}'", s)));
        }

        Ok(Self {
            host: host.to_string(),
            user,
            port,
            sensor: None,
        })
    }
}

/// Last lines the process wrote to stderr, kept for error reports
#[derive(Debug, Clone, Default)]
pub struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    const MAX_LINES: usize = 20;

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == Self::MAX_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn text(&self) -> String {
        self.lines
            .lock()
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drain a stderr pipe in the background so the process never blocks on it.
    /// The task ends when the pipe closes.
    fn drain<R>(&self, stderr: R, label: String) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let tail = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        log::warn!("[{}] stderr: {}", label, line);
                        tail.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("[{}] stderr closed: {}", label, e);
                        break;
                    }
                }
            }
        })
    }

    /// Wait (bounded) for the drain task so the tail holds everything written
    /// before the process exited
    pub async fn settle(&self, task: Option<JoinHandle<()>>, wait: Duration) -> String {
        if let Some(task) = task {
            let _ = tokio::time::timeout(wait, task).await;
        }
        self.text()
    }
}

/// How a process ended when it was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Already gone before any signal was sent
    AlreadyExited,
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Force-killed after the grace period
    Killed,
    /// No local process backs this handle
    Detached,
}

/// Lifecycle handle for the process behind a session
pub struct ProcessHandle {
    child: Option<Child>,
    label: String,
}

impl ProcessHandle {
    pub fn new(child: Child, label: impl Into<String>) -> Self {
        Self {
            child: Some(child),
            label: label.into(),
        }
    }

    /// Handle for streams that are not backed by a child process
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            child: None,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL. Bounded regardless of the
    /// process cooperating.
    pub async fn terminate(&mut self, grace: Duration) -> Termination {
        let Some(mut child) = self.child.take() else {
            return Termination::Detached;
        };

        if let Ok(Some(status)) = child.try_wait() {
            log::debug!("[{}] process already exited: {}", self.label, status);
            return Termination::AlreadyExited;
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                log::info!("[{}] process exited gracefully: {}", self.label, status);
                Termination::Graceful
            }
            Ok(Err(e)) => {
                log::warn!("[{}] wait failed ({}), killing", self.label, e);
                Self::force_kill(&mut child, &self.label).await;
                Termination::Killed
            }
            Err(_) => {
                log::warn!(
                    "[{}] process did not exit within {:?}, killing",
                    self.label,
                    grace
                );
                Self::force_kill(&mut child, &self.label).await;
                Termination::Killed
            }
        }
    }

    async fn force_kill(child: &mut Child, label: &str) {
        if let Err(e) = child.start_kill() {
            log::warn!("[{}] kill failed: {}", label, e);
            return;
        }
        // SIGKILL cannot be ignored; the bound only guards against a stuck reaper
        if tokio::time::timeout(Duration::from_secs(1), child.wait())
            .await
            .is_err()
        {
            log::error!("[{}] process not reaped after SIGKILL", label);
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                unsafe {
                    libc::kill(pid as i32, libc::SIGTERM);
                }
            }
            // kill_on_drop(true) handles the final cleanup
            let _ = child.start_kill();
        }
    }
}

/// A launched telemetry process
pub struct RemoteProcess {
    pub lines: LineStream,
    pub handle: ProcessHandle,
    pub stderr: StderrTail,
    pub stderr_task: Option<JoinHandle<()>>,
}

impl RemoteProcess {
    /// Wrap an arbitrary byte stream, e.g. a socket or an in-memory pipe
    pub fn from_reader<R>(reader: R, label: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            lines: LineStream::new(reader),
            handle: ProcessHandle::detached(label),
            stderr: StderrTail::default(),
            stderr_task: None,
        }
    }
}

/// Spawn a configured command with piped stdout/stderr
pub(crate) fn spawn_process(mut command: Command, label: String) -> StreamResult<RemoteProcess> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StreamError::Connection(format!("failed to spawn {}: {}", label, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StreamError::Connection(format!("{}: stdout not captured", label)))?;

    let stderr_tail = StderrTail::default();
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| stderr_tail.drain(stderr, label.clone()));

    Ok(RemoteProcess {
        lines: LineStream::new(stdout),
        handle: ProcessHandle::new(child, label),
        stderr: stderr_tail,
        stderr_task,
    })
}

/// Launches the telemetry command for a target
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the session and start `command`; the returned process is running
    async fn launch(&self, target: &RemoteTarget, command: &str) -> StreamResult<RemoteProcess>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        let t: RemoteTarget = "pi@imu-node:2222".parse().unwrap();
        assert_eq!(t.user.as_deref(), Some("pi"));
        assert_eq!(t.host, "imu-node");
        assert_eq!(t.port, Some(2222));
        assert_eq!(t.key(), "pi@imu-node:2222");

        let t: RemoteTarget = "10.0.0.5".parse().unwrap();
        assert_eq!(t.user, None);
        assert_eq!(t.port, None);

        assert!("@host".parse::<RemoteTarget>().is_err());
        assert!("host:notaport".parse::<RemoteTarget>().is_err());
        assert!("pi@".parse::<RemoteTarget>().is_err());
    }

    #[test]
    fn test_target_key_includes_sensor() {
        let a = RemoteTarget::new("node").with_sensor("imu0");
        let b = RemoteTarget::new("node").with_sensor("imu1");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let tail = StderrTail::default();
        for i in 0..50 {
            tail.push(format!("line {}", i));
        }
        let text = tail.text();
        assert!(text.starts_with("line 30"));
        assert!(text.ends_with("line 49"));
    }

    #[tokio::test]
    async fn test_detached_handle_terminates_immediately() {
        let mut handle = ProcessHandle::detached("mem");
        assert_eq!(
            handle.terminate(Duration::from_millis(10)).await,
            Termination::Detached
        );
    }
}
