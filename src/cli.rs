use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "imu-telemetry",
    version,
    about = "Real-time IMU telemetry acquisition over ssh",
    long_about = "Stream line-delimited IMU telemetry from a remote sampler, decode it and report\n\
                  throughput. Pipeline defaults come from IMU_* environment variables or a .env file."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show stream and record decimation for a device rate
    Rates(RatesArgs),
    /// Decode NDJSON telemetry from a file or stdin
    Decode(DecodeArgs),
    /// Run a live session against a remote (or local) sampler
    Stream(StreamArgs),
}

#[derive(Args)]
pub struct RatesArgs {
    /// Sampling rate of the device in Hz
    #[arg(long)]
    pub device_hz: f64,

    /// Requested live stream rate in Hz
    #[arg(long)]
    pub stream_hz: f64,

    /// Requested recording rate in Hz (default: full device rate)
    #[arg(long)]
    pub record_hz: Option<f64>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Args)]
pub struct DecodeArgs {
    /// Channel mode: accel, gyro or 6axis, optionally with +temp
    #[arg(long, default_value = "6axis")]
    pub mode: String,

    /// Input file (default: stdin)
    #[arg(long)]
    pub file: Option<String>,

    /// Print every decoded sample as NDJSON; the summary goes to stderr
    #[arg(long, default_value_t = false)]
    pub samples: bool,

    /// Exit with an error if any line was dropped
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Args)]
pub struct StreamArgs {
    /// Remote target as [user@]host[:port]
    #[arg(long, required_unless_present = "local", conflicts_with = "local")]
    pub host: Option<String>,

    /// Run the sampler command on this machine instead of over ssh
    #[arg(long, default_value_t = false)]
    pub local: bool,

    /// Sensor identifier, substituted into {sensor}
    #[arg(long)]
    pub sensor: Option<String>,

    /// Channel mode: accel, gyro or 6axis, optionally with +temp
    #[arg(long, default_value = "6axis")]
    pub mode: String,

    /// Sampling rate of the device in Hz
    #[arg(long)]
    pub device_hz: f64,

    /// Requested live stream rate in Hz
    #[arg(long)]
    pub stream_hz: f64,

    /// Requested recording rate in Hz (default: full device rate)
    #[arg(long)]
    pub record_hz: Option<f64>,

    /// Remote command template
    #[arg(long, env = "IMU_REMOTE_COMMAND")]
    pub command: Option<String>,

    /// Path to the ssh client
    #[arg(long, env = "IMU_SSH_BINARY")]
    pub ssh_binary: Option<String>,

    /// Samples kept in the ring buffer
    #[arg(long)]
    pub buffer_capacity: Option<usize>,

    /// Also decimate on this side, for samplers that ignore {stream_decimate}
    #[arg(long, default_value_t = false)]
    pub local_decimation: bool,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Metrics report interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub report_ms: u64,

    /// Include a spectrum peak for this axis (ax, ay, az, gx, gy, gz, temp) in reports
    #[arg(long)]
    pub spectrum_axis: Option<String>,

    /// Samples per spectrum
    #[arg(long, default_value_t = 256)]
    pub spectrum_window: usize,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress periodic reports
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}
