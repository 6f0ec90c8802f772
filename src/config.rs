use crate::streaming::command::CommandTemplate;
use crate::streaming::source::DEFAULT_MAX_LINE_BYTES;
use crate::streaming::types::StreamError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Pipeline configuration shared by every session a hub starts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Samples kept per session ring
    pub buffer_capacity: usize,
    /// Bound on launching the process and receiving its first line
    pub connect_timeout_ms: u64,
    /// Grace period between SIGTERM and SIGKILL on stop
    pub stop_timeout_ms: u64,
    /// Lines longer than this are dropped as protocol errors
    pub max_line_bytes: usize,
    /// Sliding window for the samples/sec estimate
    pub throughput_window_ms: u64,
    /// Remote command, see `CommandTemplate`
    pub command: CommandTemplate,
    /// Decimate locally as well, for samplers that ignore `{stream_decimate}`
    pub local_decimation: bool,
    /// ssh client to use instead of the one on PATH
    pub ssh_binary: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 5000,
            connect_timeout_ms: 10_000,
            stop_timeout_ms: 2_000,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            throughput_window_ms: 2_000,
            command: CommandTemplate::default(),
            local_decimation: false,
            ssh_binary: None,
        }
    }
}

impl PipelineConfig {
    /// Load overrides from the environment (and a `.env` file if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            buffer_capacity: parse_or(&lookup, "IMU_BUFFER_CAPACITY", defaults.buffer_capacity)?,
            connect_timeout_ms: parse_or(
                &lookup,
                "IMU_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout_ms,
            )?,
            stop_timeout_ms: parse_or(&lookup, "IMU_STOP_TIMEOUT_MS", defaults.stop_timeout_ms)?,
            max_line_bytes: parse_or(&lookup, "IMU_MAX_LINE_BYTES", defaults.max_line_bytes)?,
            throughput_window_ms: parse_or(
                &lookup,
                "IMU_THROUGHPUT_WINDOW_MS",
                defaults.throughput_window_ms,
            )?,
            command: lookup("IMU_REMOTE_COMMAND")
                .map(CommandTemplate::new)
                .unwrap_or(defaults.command),
            local_decimation: match lookup("IMU_LOCAL_DECIMATION") {
                Some(v) => parse_bool("IMU_LOCAL_DECIMATION", &v)?,
                None => defaults.local_decimation,
            },
            ssh_binary: lookup("IMU_SSH_BINARY")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "buffer capacity must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "connect timeout must be > 0 ms".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "max line length must be > 0 bytes".to_string(),
            ));
        }
        if self.throughput_window_ms < 10 {
            return Err(ConfigError::InvalidValue(
                "throughput window must be at least 10 ms".to_string(),
            ));
        }
        if self.command.as_str().trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "remote command must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_millis(self.throughput_window_ms)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidEnvVar {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidEnvVar { key: String, value: String },
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for StreamError {
    fn from(e: ConfigError) -> Self {
        StreamError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("IMU_BUFFER_CAPACITY", "128"),
            ("IMU_STOP_TIMEOUT_MS", " 500 "),
            ("IMU_REMOTE_COMMAND", "cat /dev/imu0"),
            ("IMU_LOCAL_DECIMATION", "TRUE"),
            ("IMU_SSH_BINARY", "/opt/ssh"),
        ]))
        .unwrap();

        assert_eq!(config.buffer_capacity, 128);
        assert_eq!(config.stop_timeout(), Duration::from_millis(500));
        assert_eq!(config.command.as_str(), "cat /dev/imu0");
        assert!(config.local_decimation);
        assert_eq!(config.ssh_binary, Some(PathBuf::from("/opt/ssh")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = PipelineConfig::from_lookup(lookup(&[("IMU_BUFFER_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));

        let err = PipelineConfig::from_lookup(lookup(&[("IMU_BUFFER_CAPACITY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        assert!(PipelineConfig::from_lookup(lookup(&[("IMU_LOCAL_DECIMATION", "maybe")])).is_err());
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"buffer_capacity": 42, "command": "x {device_hz}"}"#).unwrap();
        assert_eq!(config.buffer_capacity, 42);
        assert_eq!(config.command.as_str(), "x {device_hz}");
        assert_eq!(config.stop_timeout_ms, 2_000);
    }
}
