// Real-time IMU telemetry pipeline
//
// Lines from a remote sampler are pulled over a transport, decoded into typed
// samples and written into a bounded ring that any number of timer-driven
// consumers snapshot at their own pace.
//
// Architecture:
// - `rate`: decimation math for the stream and record paths
// - `source`: transports that launch the sampler and expose its output as lines
// - `sample`: channel modes, the sample model and the line decoder
// - `ingest`: one task per session decoding lines into the ring
// - `buffer`: fixed-capacity ring with snapshot reads
// - `session`: lifecycle of one remote process
// - `controller`: the hub that owns sessions per target
// - `consumer` / `spectrum`: periodic readers

pub mod buffer;
pub mod command;
pub mod consumer;
pub mod controller;
pub mod ingest;
pub mod metrics;
pub mod rate;
pub mod sample;
pub mod session;
pub mod source;
pub mod spectrum;
pub mod types;

pub use buffer::{BufferMetrics, BufferView, RingWriter, SampleRingBuffer, Snapshot};
pub use command::CommandTemplate;
pub use consumer::{ConsumerId, LiveFrame, LiveView, PeriodicScheduler, TickScheduler};
pub use controller::{SessionHandle, SessionInfo, TelemetryHub};
pub use ingest::{IngestConfig, IngestWorker, LineOutcome, WorkerStatus};
pub use metrics::{IngestCounters, ThroughputEstimator};
pub use rate::{decimate, Decimation, Decimator, RateConfig, RatePlan};
pub use sample::{Axis, AxisSet, ChannelMode, DecodeError, Reading, Sample, SampleDecoder};
pub use session::{RemoteSession, StateCell};
pub use source::{
    LineStream, LocalTransport, RemoteProcess, RemoteTarget, SshTransport, Termination, Transport,
};
pub use spectrum::{Spectrum, SpectralView};
pub use types::{MetricsSnapshot, SessionState, StreamError, StreamResult};
