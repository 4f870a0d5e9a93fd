// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Tone generator exposed as a property block.
//!
//! Property names follow flowgraph conventions (`center_freq`, `rf_gain`,
//! `samp_rate`) rather than the device interface, so it is reached through
//! the block adapter.

use rxlink_core::{DynResult, GainRange};

use crate::adapter::{PropertyBlock, PropertyValue};
use crate::hint::HintArgs;
use crate::signal::{shared_tone, SharedTone, ToneParams, ToneSource};
use crate::udp::{SamplePump, UdpTransport};

const PROPERTIES: &[&str] = &[
    "identity",
    "center_freq",
    "rf_gain",
    "rf_gain_range",
    "samp_rate",
    "clock_rate",
    "ant",
    "antenna_list",
    "tune_tolerance",
];

const ANTENNAS: &[&str] = &["RX", "LOOPBACK"];

pub struct ToneBlock {
    identity: String,
    center_freq: f64,
    pll_step: f64,
    rf_gain: f64,
    gain_range: GainRange,
    clock_rate: f64,
    antenna: String,
    tone: SharedTone,
    transport: UdpTransport,
    pump: Option<SamplePump>,
}

impl ToneBlock {
    pub fn from_args(args: &HintArgs, transport: UdpTransport) -> DynResult<Self> {
        let pll_step = args.get_f64("pll_step")?.unwrap_or(1_000.0);
        if pll_step <= 0.0 {
            return Err(format!("pll_step must be positive, got {}", pll_step).into());
        }
        let clock_rate = args.get_f64("clock_rate")?.unwrap_or(10_000_000.0);
        let sample_rate = args.get_f64("samp_rate")?.unwrap_or(250_000.0);
        if sample_rate <= 0.0 || sample_rate > clock_rate {
            return Err(format!("samp_rate {} outside (0, {}]", sample_rate, clock_rate).into());
        }
        Ok(Self {
            identity: args
                .get_text("name")
                .unwrap_or_else(|| "Tone generator".to_string()),
            center_freq: 0.0,
            pll_step,
            rf_gain: 0.0,
            gain_range: GainRange::new(0.0, 60.0, 1.0),
            clock_rate,
            antenna: String::new(),
            tone: shared_tone(ToneParams {
                sample_rate,
                offset_hz: args.get_f64("tone")?.unwrap_or(1_000.0),
                amplitude: ToneParams::amplitude_for_gain(0.0),
            }),
            transport,
            pump: None,
        })
    }

    fn sample_rate(&self) -> f64 {
        self.tone
            .lock()
            .map(|tone| tone.sample_rate)
            .unwrap_or_default()
    }

    fn number(name: &str, value: PropertyValue) -> DynResult<f64> {
        match value {
            PropertyValue::Number(v) if v.is_finite() => Ok(v),
            other => Err(format!("{} expects a number, got {:?}", name, other).into()),
        }
    }
}

impl PropertyBlock for ToneBlock {
    fn properties(&self) -> Vec<&'static str> {
        PROPERTIES.to_vec()
    }

    fn get(&self, name: &str) -> Option<PropertyValue> {
        let value = match name {
            "identity" => PropertyValue::Text(self.identity.clone()),
            "center_freq" => PropertyValue::Number(self.center_freq),
            "rf_gain" => PropertyValue::Number(self.rf_gain),
            "rf_gain_range" => PropertyValue::Range(self.gain_range),
            "samp_rate" => PropertyValue::Number(self.sample_rate()),
            "clock_rate" => PropertyValue::Number(self.clock_rate),
            "ant" => PropertyValue::Text(self.antenna.clone()),
            "antenna_list" => {
                PropertyValue::List(ANTENNAS.iter().map(|a| a.to_string()).collect())
            }
            "tune_tolerance" => PropertyValue::Number(self.pll_step / 2.0),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, name: &str, value: PropertyValue) -> DynResult<()> {
        match name {
            "center_freq" => {
                let hz = Self::number(name, value)?;
                // Synthesizer lands on the nearest PLL step.
                self.center_freq = (hz / self.pll_step).round() * self.pll_step;
            }
            "rf_gain" => {
                self.rf_gain = self.gain_range.clamp(Self::number(name, value)?);
                if let Ok(mut tone) = self.tone.lock() {
                    tone.amplitude = ToneParams::amplitude_for_gain(self.rf_gain);
                }
            }
            "samp_rate" => {
                let rate = Self::number(name, value)?;
                if rate <= 0.0 || rate > self.clock_rate {
                    return Err(format!("samp_rate {} outside (0, {}]", rate, self.clock_rate).into());
                }
                if let Ok(mut tone) = self.tone.lock() {
                    tone.sample_rate = rate;
                }
            }
            "ant" => match value {
                PropertyValue::Text(ant) if ANTENNAS.contains(&ant.as_str()) => self.antenna = ant,
                other => return Err(format!("invalid antenna {:?}", other).into()),
            },
            _ => return Err(format!("property '{}' is read-only or unknown", name).into()),
        }
        Ok(())
    }

    fn start(&mut self) -> DynResult<()> {
        if self.is_running() {
            return Ok(());
        }
        let source = Box::new(ToneSource::new(self.tone.clone()));
        self.pump = Some(SamplePump::spawn(source, self.transport.clone())?);
        Ok(())
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::BlockAdapter;
    use crate::hint::{DefaultHintResolver, ParsedHint};
    use rxlink_core::{AntennaSelector, Device, TuneVerdict};

    fn block(args: &str) -> ToneBlock {
        let hint =
            ParsedHint::parse(&format!("tone {}", args), &DefaultHintResolver::default()).unwrap();
        ToneBlock::from_args(&hint.args, UdpTransport::new(128)).unwrap()
    }

    #[test]
    fn adapter_drives_tone_block() {
        let mut device = BlockAdapter::new(Box::new(block("pll_step=1000"))).unwrap();
        device.open().unwrap();
        assert_eq!(device.name().unwrap(), "Tone generator");
        assert_eq!(device.antenna().as_deref(), Some("RX"));
        assert_eq!(device.antennas(), vec!["RX".to_string(), "LOOPBACK".to_string()]);
        assert_eq!(device.master_clock(), 10_000_000.0);

        let result = device.set_freq(7_100_300.0).unwrap();
        assert_eq!(result.actual_rf_hz, 7_100_000.0);
        // 300 Hz residual is inside the half-step tolerance.
        assert_eq!(device.was_tune_successful(), TuneVerdict::OnTarget);
        device.set_freq(7_100_700.0).unwrap();
        assert_eq!(device.was_tune_successful(), TuneVerdict::OnTarget);

        device.set_gain(75.0).unwrap();
        assert_eq!(device.gain(), 60.0);
        device.set_sample_rate(500_000.0).unwrap();
        assert_eq!(device.sample_rate(), 500_000.0);
        assert!(device.set_sample_rate(20e6).is_err());
        device.set_antenna(&AntennaSelector::parse("loopback")).unwrap();
        assert_eq!(device.antenna().as_deref(), Some("LOOPBACK"));
    }

    #[test]
    fn nearest_step_is_within_tolerance() {
        let mut device = BlockAdapter::new(Box::new(block("pll_step=100000"))).unwrap();
        device.open().unwrap();
        device.set_freq(100_030_000.0).unwrap();
        assert_eq!(device.was_tune_successful(), TuneVerdict::OnTarget);
        device.set_freq(100_049_000.0).unwrap();
        assert_eq!(device.freq(), 100_000_000.0);
        assert_eq!(device.was_tune_successful(), TuneVerdict::OnTarget);
    }

    #[test]
    fn read_only_properties_reject_writes() {
        let mut tone = block("");
        assert!(tone.set("identity", PropertyValue::Text("x".into())).is_err());
        assert!(tone.set("ant", PropertyValue::Text("NOPE".into())).is_err());
        assert!(tone.get("bogus").is_none());
    }

    #[test]
    fn start_is_idempotent() {
        let mut tone = block("");
        tone.start().unwrap();
        tone.start().unwrap();
        assert!(tone.is_running());
        tone.stop().unwrap();
        assert!(!tone.is_running());
    }
}
