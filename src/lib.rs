pub mod config;
pub mod streaming;

pub use config::{ConfigError, PipelineConfig};
pub use streaming::{
    ChannelMode, MetricsSnapshot, RateConfig, RemoteTarget, SessionHandle, SessionState,
    StreamError, StreamResult, TelemetryHub,
};
