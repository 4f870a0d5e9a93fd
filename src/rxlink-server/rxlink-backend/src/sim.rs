// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Simulated receiver backend.
//!
//! Holds device state in memory and models a synthesizer with finite
//! resolution and a fixed offset error, so tune results carry a realistic
//! residual. While running it streams a test tone. No hardware required.

use rxlink_core::device::{check_gain, check_sample_rate};
use rxlink_core::{AntennaSelector, Device, DynResult, GainRange, TuneResult};
use tracing::debug;

use crate::hint::HintArgs;
use crate::signal::{shared_tone, SharedTone, ToneParams, ToneSource};
use crate::udp::{SamplePump, UdpTransport};

const DEFAULT_NAME: &str = "Simulated receiver";
const DEFAULT_MASTER_CLOCK_HZ: f64 = 32_000_000.0;
const DEFAULT_RATE_HZ: f64 = 2_000_000.0;
const DEFAULT_TONE_HZ: f64 = 10_000.0;

pub struct SimDevice {
    name: String,
    serial: Option<String>,
    gain_range: GainRange,
    gain: f64,
    master_clock: f64,
    sample_rate: f64,
    step_hz: f64,
    lo_error_hz: f64,
    tolerance_hz: Option<f64>,
    freq: f64,
    last_tune: Option<TuneResult>,
    antennas: Vec<String>,
    antenna: Option<String>,
    last_error: Option<String>,
    fail_open: bool,
    opened: bool,
    tone: SharedTone,
    transport: UdpTransport,
    pump: Option<SamplePump>,
}

impl SimDevice {
    /// Build from hint arguments; see the crate docs for the accepted keys.
    pub fn from_args(args: &HintArgs, transport: UdpTransport) -> DynResult<Self> {
        let gain_range = GainRange::new(
            args.get_f64("gain_min")?.unwrap_or(0.0),
            args.get_f64("gain_max")?.unwrap_or(49.6),
            args.get_f64("gain_step")?.unwrap_or(0.5),
        );
        let master_clock = args
            .get_f64("master_clock")?
            .unwrap_or(DEFAULT_MASTER_CLOCK_HZ);
        if master_clock <= 0.0 {
            return Err(format!("master_clock must be positive, got {}", master_clock).into());
        }
        let step_hz = args.get_f64("step")?.unwrap_or(1.0);
        if step_hz <= 0.0 {
            return Err(format!("step must be positive, got {}", step_hz).into());
        }

        let antennas: Vec<String> = args
            .get_text("antennas")
            .unwrap_or_else(|| "RX1|RX2".to_string())
            .split('|')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        let gain = gain_range.clamp(args.get_f64("gain")?.unwrap_or(gain_range.min));
        let tone = shared_tone(ToneParams {
            sample_rate: DEFAULT_RATE_HZ,
            offset_hz: args.get_f64("tone")?.unwrap_or(DEFAULT_TONE_HZ),
            amplitude: ToneParams::amplitude_for_gain(gain),
        });

        let mut device = Self {
            name: args
                .get_text("name")
                .unwrap_or_else(|| DEFAULT_NAME.to_string()),
            serial: args.get_text("serial"),
            gain_range,
            gain,
            master_clock,
            sample_rate: DEFAULT_RATE_HZ,
            step_hz,
            lo_error_hz: args.get_f64("lo_error")?.unwrap_or(0.0),
            tolerance_hz: args.get_f64("tolerance")?,
            freq: 0.0,
            last_tune: None,
            antennas,
            antenna: None,
            last_error: None,
            fail_open: args.get_bool("fail_open").unwrap_or(false),
            opened: false,
            tone,
            transport,
            pump: None,
        };
        let rate = args.get_f64("rate")?.unwrap_or(DEFAULT_RATE_HZ);
        device.set_sample_rate(rate)?;
        Ok(device)
    }

    fn fail<T>(&mut self, message: String) -> DynResult<T> {
        debug!("{}: {}", self.name, message);
        self.last_error = Some(message.clone());
        Err(message.into())
    }

    fn update_tone(&self) {
        if let Ok(mut tone) = self.tone.lock() {
            tone.sample_rate = self.sample_rate;
            tone.amplitude = ToneParams::amplitude_for_gain(self.gain);
        }
    }
}

impl Device for SimDevice {
    fn open(&mut self) -> DynResult<()> {
        if self.fail_open {
            return self.fail("simulated open failure".to_string());
        }
        if self.antenna.is_none() {
            self.antenna = self.antennas.first().cloned();
        }
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut pump) = self.pump.take() {
            pump.stop();
        }
        self.opened = false;
    }

    fn start(&mut self) -> DynResult<()> {
        if !self.opened {
            return self.fail("device is not open".to_string());
        }
        if self.is_running() {
            return Ok(());
        }
        let source = Box::new(ToneSource::new(self.tone.clone()));
        match SamplePump::spawn(source, self.transport.clone()) {
            Ok(pump) => {
                self.pump = Some(pump);
                Ok(())
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn stop(&mut self) -> DynResult<()> {
        if let Some(mut pump) = self.pump.take() {
            pump.stop();
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.pump.as_ref().is_some_and(SamplePump::is_running)
    }

    fn name(&self) -> DynResult<String> {
        Ok(self.name.clone())
    }

    fn serial(&self) -> DynResult<Option<String>> {
        Ok(self.serial.clone())
    }

    fn gain_range(&self) -> GainRange {
        self.gain_range
    }

    fn gain(&self) -> f64 {
        self.gain
    }

    fn set_gain(&mut self, gain: f64) -> DynResult<()> {
        match check_gain(&self.gain_range, gain) {
            Ok(gain) => {
                self.gain = gain;
                self.update_tone();
                Ok(())
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_sample_rate(&mut self, rate: f64) -> DynResult<()> {
        let rate = match check_sample_rate(rate) {
            Ok(rate) => rate,
            Err(e) => return self.fail(e.to_string()),
        };
        if rate > self.master_clock {
            return self.fail(format!(
                "sample rate {} exceeds master clock {}",
                rate, self.master_clock
            ));
        }
        // Integer decimation of the master clock.
        let decimation = (self.master_clock / rate).round().max(1.0);
        self.sample_rate = self.master_clock / decimation;
        self.update_tone();
        Ok(())
    }

    fn master_clock(&self) -> f64 {
        self.master_clock
    }

    fn freq(&self) -> f64 {
        self.freq
    }

    fn set_freq(&mut self, hz: f64) -> DynResult<TuneResult> {
        if !hz.is_finite() || hz < 0.0 {
            return self.fail(format!("invalid frequency: {}", hz));
        }
        let actual_rf = (hz / self.step_hz).round() * self.step_hz + self.lo_error_hz;
        let offset = actual_rf - hz;
        let result = TuneResult {
            target_rf_hz: hz,
            actual_rf_hz: actual_rf,
            target_baseband_hz: offset,
            actual_baseband_hz: offset,
        };
        self.freq = actual_rf;
        self.last_tune = Some(result);
        Ok(result)
    }

    fn freq_tolerance(&self) -> Option<f64> {
        self.tolerance_hz
    }

    fn last_tune_result(&self) -> Option<TuneResult> {
        self.last_tune
    }

    fn antennas(&self) -> Vec<String> {
        self.antennas.clone()
    }

    fn antenna(&self) -> Option<String> {
        self.antenna.clone()
    }

    fn set_antenna(&mut self, antenna: &AntennaSelector) -> DynResult<()> {
        match antenna.resolve(&self.antennas).map(str::to_string) {
            Some(name) => {
                self.antenna = Some(name);
                Ok(())
            }
            None => self.fail(format!("unknown antenna: {}", antenna)),
        }
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.close();
    }
}
