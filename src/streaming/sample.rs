// Sample model and fault-tolerant line decoder
//
// The channel mode is chosen once per session. The decoder captures it at
// construction and applies the matching required-field set to every line, so
// the shape of a Sample never changes mid-session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::streaming::types::StreamError;

/// Which axes a session records and streams
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AxisSet {
    Accel,
    Gyro,
    SixAxis,
}

/// Fixed field layout of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelMode {
    pub axes: AxisSet,
    /// When set, `temp_c` is a required field
    #[serde(default)]
    pub temperature: bool,
}

impl ChannelMode {
    pub const ACCEL: ChannelMode = ChannelMode {
        axes: AxisSet::Accel,
        temperature: false,
    };
    pub const GYRO: ChannelMode = ChannelMode {
        axes: AxisSet::Gyro,
        temperature: false,
    };
    pub const SIX_AXIS: ChannelMode = ChannelMode {
        axes: AxisSet::SixAxis,
        temperature: false,
    };

    pub fn with_temperature(mut self) -> Self {
        self.temperature = true;
        self
    }

    pub fn has_accel(&self) -> bool {
        matches!(self.axes, AxisSet::Accel | AxisSet::SixAxis)
    }

    pub fn has_gyro(&self) -> bool {
        matches!(self.axes, AxisSet::Gyro | AxisSet::SixAxis)
    }

    /// Axes carried by samples in this mode
    pub fn axes(&self) -> Vec<Axis> {
        let mut axes = Vec::with_capacity(7);
        if self.has_accel() {
            axes.extend([Axis::Ax, Axis::Ay, Axis::Az]);
        }
        if self.has_gyro() {
            axes.extend([Axis::Gx, Axis::Gy, Axis::Gz]);
        }
        if self.temperature {
            axes.push(Axis::Temp);
        }
        axes
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self.axes {
            AxisSet::Accel => "accel",
            AxisSet::Gyro => "gyro",
            AxisSet::SixAxis => "6axis",
        };
        if self.temperature {
            write!(f, "{}+temp", base)
        } else {
            f.write_str(base)
        }
    }
}

impl FromStr for ChannelMode {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let mut parts = normalized.split('+');

        let axes = match parts.next().unwrap_or_default() {
            "accel" | "acc" | "3axis" | "3-axis" => AxisSet::Accel,
            "gyro" => AxisSet::Gyro,
            "6axis" | "6-axis" | "imu" | "accel_gyro" => AxisSet::SixAxis,
            other => {
                return Err(StreamError::Config(format!(
                    "unknown channel mode '{}' (expected accel, gyro or 6axis)",
                    other
                )))
            }
        };

        let mut temperature = false;
        for extra in parts {
            match extra {
                "temp" | "temperature" if !temperature => temperature = true,
                "temp" | "temperature" => {
                    return Err(StreamError::Config(format!(
                        "channel mode '{}' lists temperature twice",
                        s
                    )))
                }
                other => {
                    return Err(StreamError::Config(format!(
                        "unknown channel mode field '{}' in '{}'",
                        other, s
                    )))
                }
            }
        }

        Ok(ChannelMode { axes, temperature })
    }
}

/// One named field of a sample
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Ax,
    Ay,
    Az,
    Gx,
    Gy,
    Gz,
    Temp,
}

impl FromStr for Axis {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ax" => Ok(Axis::Ax),
            "ay" => Ok(Axis::Ay),
            "az" => Ok(Axis::Az),
            "gx" => Ok(Axis::Gx),
            "gy" => Ok(Axis::Gy),
            "gz" => Ok(Axis::Gz),
            "temp" | "temp_c" => Ok(Axis::Temp),
            other => Err(StreamError::Config(format!("unknown axis '{}'", other))),
        }
    }
}

/// Axis payload, one variant per channel mode
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Reading {
    Accel {
        ax: f64,
        ay: f64,
        az: f64,
    },
    Gyro {
        gx: f64,
        gy: f64,
        gz: f64,
    },
    SixAxis {
        ax: f64,
        ay: f64,
        az: f64,
        gx: f64,
        gy: f64,
        gz: f64,
    },
}

/// One timestamped reading
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Sample {
    pub timestamp_ns: u64,
    pub t_s: f64,
    pub sensor_id: String,
    #[serde(flatten)]
    pub reading: Reading,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
}

impl Sample {
    pub fn accel(&self) -> Option<[f64; 3]> {
        match self.reading {
            Reading::Accel { ax, ay, az } | Reading::SixAxis { ax, ay, az, .. } => {
                Some([ax, ay, az])
            }
            Reading::Gyro { .. } => None,
        }
    }

    pub fn gyro(&self) -> Option<[f64; 3]> {
        match self.reading {
            Reading::Gyro { gx, gy, gz } | Reading::SixAxis { gx, gy, gz, .. } => {
                Some([gx, gy, gz])
            }
            Reading::Accel { .. } => None,
        }
    }

    pub fn value(&self, axis: Axis) -> Option<f64> {
        match axis {
            Axis::Ax => self.accel().map(|a| a[0]),
            Axis::Ay => self.accel().map(|a| a[1]),
            Axis::Az => self.accel().map(|a| a[2]),
            Axis::Gx => self.gyro().map(|g| g[0]),
            Axis::Gy => self.gyro().map(|g| g[1]),
            Axis::Gz => self.gyro().map(|g| g[2]),
            Axis::Temp => self.temp_c,
        }
    }
}

/// Why a line was rejected
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("line is not a JSON object")]
    NotAnObject,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

impl From<DecodeError> for StreamError {
    fn from(e: DecodeError) -> Self {
        StreamError::Protocol(e.to_string())
    }
}

// Every field optional so presence is checked against the mode, not serde.
// Wrong types still fail deserialization.
#[derive(Debug, Deserialize)]
struct WireRecord {
    timestamp_ns: Option<u64>,
    t_s: Option<f64>,
    sensor_id: Option<String>,
    ax: Option<f64>,
    ay: Option<f64>,
    az: Option<f64>,
    gx: Option<f64>,
    gy: Option<f64>,
    gz: Option<f64>,
    temp_c: Option<f64>,
}

fn required<T>(value: Option<T>, name: &'static str) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::MissingField(name))
}

/// Decodes wire lines into samples for one fixed channel mode
#[derive(Debug, Clone, Copy)]
pub struct SampleDecoder {
    mode: ChannelMode,
}

impl SampleDecoder {
    pub fn new(mode: ChannelMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn decode(&self, line: &str) -> Result<Sample, DecodeError> {
        let line = line.trim();
        // serde would happily map a JSON array onto the struct positionally
        if !line.starts_with('{') {
            return Err(DecodeError::NotAnObject);
        }

        let record: WireRecord =
            serde_json::from_str(line).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let timestamp_ns = required(record.timestamp_ns, "timestamp_ns")?;
        let t_s = required(record.t_s, "t_s")?;
        let sensor_id = required(record.sensor_id, "sensor_id")?;

        let reading = match self.mode.axes {
            AxisSet::Accel => Reading::Accel {
                ax: required(record.ax, "ax")?,
                ay: required(record.ay, "ay")?,
                az: required(record.az, "az")?,
            },
            AxisSet::Gyro => Reading::Gyro {
                gx: required(record.gx, "gx")?,
                gy: required(record.gy, "gy")?,
                gz: required(record.gz, "gz")?,
            },
            AxisSet::SixAxis => Reading::SixAxis {
                ax: required(record.ax, "ax")?,
                ay: required(record.ay, "ay")?,
                az: required(record.az, "az")?,
                gx: required(record.gx, "gx")?,
                gy: required(record.gy, "gy")?,
                gz: required(record.gz, "gz")?,
            },
        };

        let temp_c = if self.mode.temperature {
            Some(required(record.temp_c, "temp_c")?)
        } else {
            record.temp_c
        };

        Ok(Sample {
            timestamp_ns,
            t_s,
            sensor_id,
            reading,
            temp_c,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIX_AXIS_LINE: &str = r#"{"timestamp_ns": 1700000000123, "t_s": 0.005, "sensor_id": "imu0", "ax": 0.1, "ay": -0.2, "az": 9.81, "gx": 0.01, "gy": 0.02, "gz": -0.03}"#;

    #[test]
    fn test_decode_six_axis_field_for_field() {
        let decoder = SampleDecoder::new(ChannelMode::SIX_AXIS);
        let sample = decoder.decode(SIX_AXIS_LINE).unwrap();

        assert_eq!(sample.timestamp_ns, 1_700_000_000_123);
        assert_eq!(sample.t_s, 0.005);
        assert_eq!(sample.sensor_id, "imu0");
        assert_eq!(
            sample.reading,
            Reading::SixAxis {
                ax: 0.1,
                ay: -0.2,
                az: 9.81,
                gx: 0.01,
                gy: 0.02,
                gz: -0.03,
            }
        );
        assert_eq!(sample.temp_c, None);
    }

    #[test]
    fn test_accel_mode_ignores_gyro_fields() {
        let decoder = SampleDecoder::new(ChannelMode::ACCEL);
        let sample = decoder.decode(SIX_AXIS_LINE).unwrap();
        assert_eq!(
            sample.reading,
            Reading::Accel {
                ax: 0.1,
                ay: -0.2,
                az: 9.81
            }
        );
        assert_eq!(sample.gyro(), None);
    }

    #[test]
    fn test_gyro_mode_requires_gyro_fields() {
        let decoder = SampleDecoder::new(ChannelMode::GYRO);
        let line = r#"{"timestamp_ns": 1, "t_s": 0.0, "sensor_id": "a", "ax": 1.0, "ay": 2.0, "az": 3.0}"#;
        assert_eq!(
            decoder.decode(line).unwrap_err(),
            DecodeError::MissingField("gx")
        );
    }

    #[test]
    fn test_temperature_optional_unless_mode_requires_it() {
        let line = r#"{"timestamp_ns": 5, "t_s": 1.5, "sensor_id": "s", "ax": 0, "ay": 0, "az": 1, "temp_c": 31.5}"#;
        let sample = SampleDecoder::new(ChannelMode::ACCEL).decode(line).unwrap();
        assert_eq!(sample.temp_c, Some(31.5));

        let no_temp = r#"{"timestamp_ns": 5, "t_s": 1.5, "sensor_id": "s", "ax": 0, "ay": 0, "az": 1}"#;
        let strict = SampleDecoder::new(ChannelMode::ACCEL.with_temperature());
        assert_eq!(
            strict.decode(no_temp).unwrap_err(),
            DecodeError::MissingField("temp_c")
        );
    }

    #[test]
    fn test_malformed_lines_rejected() {
        let decoder = SampleDecoder::new(ChannelMode::ACCEL);

        assert_eq!(decoder.decode("not json").unwrap_err(), DecodeError::NotAnObject);
        assert_eq!(
            decoder.decode("[1, 0.5, \"imu\", 0, 0, 0]").unwrap_err(),
            DecodeError::NotAnObject
        );
        assert!(matches!(
            decoder.decode(r#"{"timestamp_ns": 1, "t_s": "#),
            Err(DecodeError::InvalidJson(_))
        ));
        // Wrong type: float timestamp
        assert!(matches!(
            decoder.decode(r#"{"timestamp_ns": 1.5, "t_s": 0.0, "sensor_id": "a", "ax": 0, "ay": 0, "az": 0}"#),
            Err(DecodeError::InvalidJson(_))
        ));
        // Wrong type: numeric sensor id
        assert!(matches!(
            decoder.decode(r#"{"timestamp_ns": 1, "t_s": 0.0, "sensor_id": 7, "ax": 0, "ay": 0, "az": 0}"#),
            Err(DecodeError::InvalidJson(_))
        ));
        assert_eq!(
            decoder
                .decode(r#"{"t_s": 0.0, "sensor_id": "a", "ax": 0, "ay": 0, "az": 0}"#)
                .unwrap_err(),
            DecodeError::MissingField("timestamp_ns")
        );
    }

    #[test]
    fn test_channel_mode_parsing() {
        assert_eq!("accel".parse::<ChannelMode>().unwrap(), ChannelMode::ACCEL);
        assert_eq!("3axis".parse::<ChannelMode>().unwrap(), ChannelMode::ACCEL);
        assert_eq!("IMU".parse::<ChannelMode>().unwrap(), ChannelMode::SIX_AXIS);
        assert_eq!(
            "gyro+temp".parse::<ChannelMode>().unwrap(),
            ChannelMode::GYRO.with_temperature()
        );
        assert!("mag".parse::<ChannelMode>().unwrap_err().is_config());
        assert!("accel+temp+temp".parse::<ChannelMode>().is_err());
        assert!("accel+baro".parse::<ChannelMode>().is_err());

        assert_eq!(ChannelMode::SIX_AXIS.with_temperature().to_string(), "6axis+temp");
    }

    #[test]
    fn test_sample_serializes_flat() {
        let decoder = SampleDecoder::new(ChannelMode::SIX_AXIS);
        let sample = decoder.decode(SIX_AXIS_LINE).unwrap();
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["sensor_id"], "imu0");
        assert_eq!(json["az"], 9.81);
        assert_eq!(json["gz"], -0.03);
        assert!(json.get("temp_c").is_none());
    }
}
