// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Uniform capability interface over a radio receiver backend.

use std::fmt;

use crate::tune::{TuneResult, TuneVerdict};
use crate::DynResult;

/// Gain range advertised by a device, in dB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl GainRange {
    #[must_use]
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        if min <= max {
            Self { min, max, step }
        } else {
            Self {
                min: max,
                max: min,
                step,
            }
        }
    }

    /// Clip a gain value into `[min, max]`.
    #[must_use]
    pub fn clamp(&self, gain: f64) -> f64 {
        if gain < self.min {
            self.min
        } else if gain > self.max {
            self.max
        } else {
            gain
        }
    }
}

impl Default for GainRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            step: 0.0,
        }
    }
}

/// Antenna selection by list index or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntennaSelector {
    Index(usize),
    Name(String),
}

impl AntennaSelector {
    /// Purely numeric input selects by index, anything else by name.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.parse::<usize>() {
            Ok(idx) => AntennaSelector::Index(idx),
            Err(_) => AntennaSelector::Name(trimmed.to_string()),
        }
    }

    /// Look the selection up in a device's antenna list.
    ///
    /// Names match case-insensitively; the returned name is the device's own
    /// spelling.
    pub fn resolve<'a>(&self, antennas: &'a [String]) -> Option<&'a str> {
        match self {
            AntennaSelector::Index(idx) => antennas.get(*idx).map(String::as_str),
            AntennaSelector::Name(name) => antennas
                .iter()
                .find(|a| a.eq_ignore_ascii_case(name))
                .map(String::as_str),
        }
    }
}

impl fmt::Display for AntennaSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AntennaSelector::Index(idx) => write!(f, "{}", idx),
            AntennaSelector::Name(name) => f.write_str(name),
        }
    }
}

/// Reject non-positive or non-finite sample rates.
pub fn check_sample_rate(rate: f64) -> DynResult<f64> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(format!("invalid sample rate: {}", rate).into());
    }
    Ok(rate)
}

/// Reject non-finite gains and clip the rest into `range`.
pub fn check_gain(range: &GainRange, gain: f64) -> DynResult<f64> {
    if !gain.is_finite() {
        return Err(format!("invalid gain: {}", gain).into());
    }
    Ok(range.clamp(gain))
}

/// Capability interface every receiver backend exposes to a control session.
///
/// Mutating operations return an error instead of ignoring invalid input.
/// Getters return the best-effort cached value and never fail.
pub trait Device: Send {
    /// Prepare the device for use (selects the default antenna).
    fn open(&mut self) -> DynResult<()>;

    /// Release the device. Stops streaming if running.
    fn close(&mut self);

    fn start(&mut self) -> DynResult<()>;

    fn stop(&mut self) -> DynResult<()>;

    fn is_running(&self) -> bool;

    fn name(&self) -> DynResult<String>;

    fn serial(&self) -> DynResult<Option<String>> {
        Ok(None)
    }

    fn gain_range(&self) -> GainRange;

    fn gain(&self) -> f64;

    /// Set the gain; out-of-range values are clipped into `gain_range()`.
    fn set_gain(&mut self, gain: f64) -> DynResult<()>;

    fn sample_rate(&self) -> f64;

    /// Set the sample rate; fails if `rate <= 0`.
    fn set_sample_rate(&mut self, rate: f64) -> DynResult<()>;

    /// Reference clock the sample rate is derived from.
    fn master_clock(&self) -> f64;

    /// Achieved center frequency.
    fn freq(&self) -> f64;

    /// Tune and return the requested/achieved breakdown.
    fn set_freq(&mut self, hz: f64) -> DynResult<TuneResult>;

    /// Backend tuning tolerance in Hz, if the backend exposes one.
    fn freq_tolerance(&self) -> Option<f64> {
        None
    }

    fn last_tune_result(&self) -> Option<TuneResult>;

    /// Verdict for the most recent `set_freq` only.
    fn was_tune_successful(&self) -> TuneVerdict {
        self.last_tune_result()
            .map(|result| result.verdict(self.freq_tolerance()))
            .unwrap_or(TuneVerdict::OnTarget)
    }

    fn antennas(&self) -> Vec<String>;

    fn antenna(&self) -> Option<String>;

    fn set_antenna(&mut self, antenna: &AntennaSelector) -> DynResult<()>;

    fn last_error(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_range_clamps_both_ends() {
        let range = GainRange::new(0.0, 49.6, 0.1);
        assert_eq!(range.clamp(-5.0), 0.0);
        assert_eq!(range.clamp(60.0), 49.6);
        assert_eq!(range.clamp(20.0), 20.0);
    }

    #[test]
    fn gain_range_swaps_inverted_bounds() {
        let range = GainRange::new(10.0, -10.0, 1.0);
        assert_eq!(range.min, -10.0);
        assert_eq!(range.max, 10.0);
    }

    #[test]
    fn antenna_selector_by_index_and_name() {
        let antennas = vec!["TX/RX".to_string(), "RX2".to_string()];
        assert_eq!(AntennaSelector::parse("1").resolve(&antennas), Some("RX2"));
        assert_eq!(AntennaSelector::parse("rx2").resolve(&antennas), Some("RX2"));
        assert_eq!(AntennaSelector::parse("2").resolve(&antennas), None);
        assert_eq!(AntennaSelector::parse("LNA").resolve(&antennas), None);
    }

    #[test]
    fn check_sample_rate_rejects_non_positive() {
        assert!(check_sample_rate(0.0).is_err());
        assert!(check_sample_rate(-1.0).is_err());
        assert!(check_sample_rate(f64::NAN).is_err());
        assert_eq!(check_sample_rate(2_048_000.0).unwrap(), 2_048_000.0);
    }

    #[test]
    fn check_gain_clips_and_rejects_nan() {
        let range = GainRange::new(0.0, 30.0, 1.0);
        assert_eq!(check_gain(&range, 45.0).unwrap(), 30.0);
        assert!(check_gain(&range, f64::NAN).is_err());
    }
}
