// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Synthetic I/Q sources for the built-in backends.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex, PoisonError};

use num_complex::Complex;

/// Abstraction over any I/Q sample source feeding a [`crate::SamplePump`].
pub trait IqSource: Send + 'static {
    /// Read the next block of samples into `buf`.
    /// Returns the number of samples written, or an error string.
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, String>;

    /// Current output rate in samples per second, used for pacing.
    fn sample_rate(&self) -> f64;
}

/// Tone parameters shared between a device and its running source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneParams {
    pub sample_rate: f64,
    /// Tone position relative to the tuned center, in Hz.
    pub offset_hz: f64,
    /// Linear amplitude, 0.0..=1.0.
    pub amplitude: f32,
}

impl ToneParams {
    /// Amplitude for a gain setting, relative to a -26 dBFS floor at 0 dB.
    pub fn amplitude_for_gain(gain_db: f64) -> f32 {
        let linear = 0.05 * 10f64.powf(gain_db / 20.0);
        linear.clamp(0.0, 0.9) as f32
    }
}

pub type SharedTone = Arc<Mutex<ToneParams>>;

pub fn shared_tone(params: ToneParams) -> SharedTone {
    Arc::new(Mutex::new(params))
}

/// Complex exponential at the shared tone offset.
pub struct ToneSource {
    params: SharedTone,
    phase: f64,
}

impl ToneSource {
    pub fn new(params: SharedTone) -> Self {
        Self { params, phase: 0.0 }
    }

    fn snapshot(&self) -> ToneParams {
        *self.params.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IqSource for ToneSource {
    fn read_into(&mut self, buf: &mut [Complex<f32>]) -> Result<usize, String> {
        let params = self.snapshot();
        if params.sample_rate <= 0.0 {
            return Err(format!("invalid sample rate {}", params.sample_rate));
        }
        let step = TAU * params.offset_hz / params.sample_rate;
        for sample in buf.iter_mut() {
            *sample = Complex::from_polar(params.amplitude, self.phase as f32);
            self.phase = (self.phase + step).rem_euclid(TAU);
        }
        Ok(buf.len())
    }

    fn sample_rate(&self) -> f64 {
        self.snapshot().sample_rate
    }
}
