// Common types for the streaming module

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for streaming operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur during streaming operations
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session already running for target: {0}")]
    AlreadyRunning(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl StreamError {
    /// Protocol errors are absorbed by the ingest loop; everything else ends the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StreamError::Protocol(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, StreamError::Config(_))
    }
}

/// Lifecycle state of a remote session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum SessionState {
    /// No process running
    Idle,

    /// Transport is being established and the remote process launched
    Connecting,

    /// Remote process is producing lines
    Streaming { started_at: f64 },

    /// Stop requested, waiting for the worker and process to wind down
    Stopping,

    /// Transport failed; only an explicit retry leaves this state
    Failed { message: String },
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl SessionState {
    pub fn is_rest(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Failed { .. })
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Streaming { .. })
    }
}

/// Point-in-time view of a session's ingest counters
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub samples_per_sec: f64,
    pub drop_count: u64,
    pub evicted_count: u64,
    pub decoded_count: u64,
    pub lines_received: u64,
    pub buffer_len: usize,
}
