use imu_telemetry::StreamError;

pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const INPUT_ERROR: i32 = 2;
pub const CONFIG_ERROR: i32 = 3;
pub const CONNECTION_ERROR: i32 = 4;

/// Exit code for a pipeline error
pub fn for_stream_error(error: &StreamError) -> i32 {
    match error {
        StreamError::Config(_) => CONFIG_ERROR,
        StreamError::Connection(_) => CONNECTION_ERROR,
        StreamError::Protocol(_) => INPUT_ERROR,
        StreamError::Io(_)
        | StreamError::AlreadyRunning(_)
        | StreamError::SessionNotFound(_) => EXECUTION_ERROR,
    }
}
