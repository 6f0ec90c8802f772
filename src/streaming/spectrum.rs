// Spectral consumer: magnitude spectrum of one axis over the newest samples

use crate::streaming::buffer::{BufferView, Snapshot};
use crate::streaming::consumer::{ConsumerId, PeriodicScheduler};
use crate::streaming::sample::Axis;
use crate::streaming::types::{StreamError, StreamResult};
use parking_lot::Mutex;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

/// One computed spectrum
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Spectrum {
    pub axis: Axis,
    /// Bin centre frequencies in Hz, positive half only
    pub frequencies: Vec<f64>,
    pub magnitudes: Vec<f64>,
    /// Samples that went into the transform
    pub sample_count: usize,
    /// Buffer sequence the input was taken at
    pub sequence: u64,
}

impl Spectrum {
    /// Frequency of the strongest non-DC bin
    pub fn peak_hz(&self) -> Option<f64> {
        self.magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| self.frequencies[i])
    }
}

/// Hann-windowed FFT magnitude, zero-padded to the next power of two.
/// Returns the positive-frequency half, scaled by 2/n.
pub fn fft_magnitude(data: &[f64]) -> Vec<f64> {
    if data.is_empty() {
        return vec![];
    }

    let n = data.len().next_power_of_two();
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);

    let mut buffer: Vec<Complex<f64>> = data.iter().map(|&x| Complex::new(x, 0.0)).collect();
    buffer.resize(n, Complex::new(0.0, 0.0));

    if data.len() > 1 {
        let span = (data.len() - 1) as f64;
        for (i, sample) in buffer.iter_mut().enumerate().take(data.len()) {
            sample.re *= 0.5 * (1.0 - (2.0 * PI * i as f64 / span).cos());
        }
    }

    fft.process(&mut buffer);

    let scale = 2.0 / n as f64;
    buffer[..n / 2].iter().map(|c| c.norm() * scale).collect()
}

pub fn fft_frequencies(data_len: usize, sample_rate: f64) -> Vec<f64> {
    let n = data_len.next_power_of_two();
    let resolution = sample_rate / n as f64;
    (0..n / 2).map(|i| i as f64 * resolution).collect()
}

/// Periodically transforms the newest `window` values of one axis.
///
/// `sample_rate_hz` should be the effective stream rate of the session, not
/// the device rate.
#[derive(Clone)]
pub struct SpectralView {
    view: BufferView,
    axis: Axis,
    window: usize,
    sample_rate_hz: f64,
    latest: Arc<Mutex<Option<Spectrum>>>,
}

impl SpectralView {
    pub fn new(view: BufferView, axis: Axis, window: usize, sample_rate_hz: f64) -> StreamResult<Self> {
        if window < 2 {
            return Err(StreamError::Config(format!(
                "spectral window must hold at least 2 samples, got {}",
                window
            )));
        }
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(StreamError::Config(format!(
                "spectral sample rate must be > 0 Hz, got {}",
                sample_rate_hz
            )));
        }

        Ok(Self {
            view,
            axis,
            window,
            sample_rate_hz,
            latest: Arc::new(Mutex::new(None)),
        })
    }

    /// Compute from a snapshot. `None` until the window is full or when the
    /// axis is not part of the session's channel mode.
    pub fn compute(&self, snapshot: &Snapshot) -> Option<Spectrum> {
        let values: Vec<f64> = snapshot.iter().filter_map(|s| s.value(self.axis)).collect();
        if values.len() < self.window {
            return None;
        }
        let values = &values[values.len() - self.window..];

        // Remove DC so the gravity component does not swamp the low bins
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let centred: Vec<f64> = values.iter().map(|v| v - mean).collect();

        Some(Spectrum {
            axis: self.axis,
            frequencies: fft_frequencies(centred.len(), self.sample_rate_hz),
            magnitudes: fft_magnitude(&centred),
            sample_count: centred.len(),
            sequence: snapshot.sequence(),
        })
    }

    /// Recompute if new data arrived; returns true when the spectrum changed
    pub fn refresh(&self) -> bool {
        let seen = self.latest.lock().as_ref().map(|s| s.sequence);
        if seen == Some(self.view.sequence()) {
            return false;
        }

        let snapshot = self.view.latest(self.window);
        match self.compute(&snapshot) {
            Some(spectrum) => {
                *self.latest.lock() = Some(spectrum);
                true
            }
            None => false,
        }
    }

    pub fn latest(&self) -> Option<Spectrum> {
        self.latest.lock().clone()
    }

    pub fn attach(&self, scheduler: &dyn PeriodicScheduler, interval: Duration) -> ConsumerId {
        let view = self.clone();
        scheduler.register_periodic(
            interval,
            Box::new(move || {
                view.refresh();
            }),
        )
    }
}
