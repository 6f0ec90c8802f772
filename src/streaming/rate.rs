// Decimation math for multi-rate acquisition
//
// The device samples at one rate; the live stream and the on-device recorder
// each request their own target. Both plans derive from the same device rate
// through separate calls, so tightening the stream never throttles recording.

use crate::streaming::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};

/// Outcome of decimating a device rate down to a target rate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Decimation {
    /// Forward every `factor`-th sample
    pub factor: u32,
    /// Rate actually delivered after decimation
    pub effective_hz: f64,
}

/// Compute the decimation factor and effective rate for a target.
///
/// `factor = max(1, ceil(device_hz / target_hz))`. Requesting more than the
/// device produces yields factor 1 at the device rate.
pub fn decimate(device_hz: f64, target_hz: f64) -> StreamResult<Decimation> {
    if !device_hz.is_finite() || device_hz <= 0.0 {
        return Err(StreamError::Config(format!(
            "device rate must be > 0 Hz, got {}",
            device_hz
        )));
    }
    if !target_hz.is_finite() || target_hz <= 0.0 {
        return Err(StreamError::Config(format!(
            "target rate must be > 0 Hz, got {}",
            target_hz
        )));
    }

    let ratio = device_hz / target_hz;
    let factor = ratio.ceil().max(1.0);
    if factor > u32::MAX as f64 {
        return Err(StreamError::Config(format!(
            "decimation factor {} out of range for {} Hz -> {} Hz",
            factor, device_hz, target_hz
        )));
    }
    let factor = factor as u32;

    Ok(Decimation {
        factor,
        effective_hz: device_hz / factor as f64,
    })
}

/// Requested rates for a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateConfig {
    pub device_hz: f64,
    pub target_stream_hz: f64,
    /// Recording target; `None` records at the full device rate
    #[serde(default)]
    pub target_record_hz: Option<f64>,
}

impl RateConfig {
    pub fn new(device_hz: f64, target_stream_hz: f64) -> Self {
        Self {
            device_hz,
            target_stream_hz,
            target_record_hz: None,
        }
    }

    pub fn with_record_hz(mut self, target_record_hz: f64) -> Self {
        self.target_record_hz = Some(target_record_hz);
        self
    }

    /// Resolve both decimation plans, failing fast on invalid input
    pub fn plan(&self) -> StreamResult<RatePlan> {
        let stream = decimate(self.device_hz, self.target_stream_hz)?;
        let record = decimate(
            self.device_hz,
            self.target_record_hz.unwrap_or(self.device_hz),
        )?;

        Ok(RatePlan {
            device_hz: self.device_hz,
            stream,
            record,
        })
    }
}

/// Independent stream and record decimation derived from one device rate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RatePlan {
    pub device_hz: f64,
    pub stream: Decimation,
    pub record: Decimation,
}

/// Forwards every Nth item, starting with the first
#[derive(Debug, Clone)]
pub struct Decimator {
    factor: u32,
    counter: u32,
}

impl Decimator {
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
            counter: 0,
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Returns true when the current item should be kept
    pub fn accept(&mut self) -> bool {
        let keep = self.counter == 0;
        self.counter += 1;
        if self.counter >= self.factor {
            self.counter = 0;
        }
        keep
    }
}
