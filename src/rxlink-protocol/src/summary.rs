// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Device summary carried by `DEVICE` replies and the greeting.
//!
//! Wire form:
//! `name|gain_min|gain_max|gain_step|master_clock_hz|samples_per_packet|ant1,ant2|serial`

use std::fmt;

use rxlink_core::GainRange;

use crate::codec::format_hz;

const UNBOUND: &str = "-";

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    pub name: String,
    pub gain: GainRange,
    pub master_clock_hz: f64,
    pub samples_per_packet: usize,
    pub antennas: Vec<String>,
    pub serial: Option<String>,
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let antennas: Vec<String> = self.antennas.iter().map(|a| field(a)).collect();
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}|{}",
            field(&self.name),
            format_hz(self.gain.min),
            format_hz(self.gain.max),
            format_hz(self.gain.step),
            format_hz(self.master_clock_hz),
            self.samples_per_packet,
            antennas.join(","),
            self.serial.as_deref().map(field).unwrap_or_default(),
        )
    }
}

impl DeviceSummary {
    pub fn parse(input: &str) -> Result<Self, String> {
        let parts: Vec<&str> = input.trim().splitn(8, '|').collect();
        if parts.len() < 7 {
            return Err(format!("device summary has {} fields, expected 8", parts.len()));
        }
        let number = |idx: usize, what: &str| -> Result<f64, String> {
            parts[idx]
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("invalid {} '{}'", what, parts[idx]))
        };
        let samples_per_packet = parts[5]
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("invalid samples per packet '{}'", parts[5]))?;
        let antennas = parts[6]
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        let serial = parts
            .get(7)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            name: parts[0].trim().to_string(),
            gain: GainRange::new(
                number(1, "gain minimum")?,
                number(2, "gain maximum")?,
                number(3, "gain step")?,
            ),
            master_clock_hz: number(4, "master clock")?,
            samples_per_packet,
            antennas,
            serial,
        })
    }
}

/// Body of a `DEVICE` reply.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReply {
    Bound(DeviceSummary),
    /// No device bound, optionally with the reason creation failed.
    Unbound { error: Option<String> },
}

impl DeviceReply {
    pub fn unbound() -> Self {
        DeviceReply::Unbound { error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        DeviceReply::Unbound {
            error: Some(error.into()),
        }
    }

    pub fn parse(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == UNBOUND {
            return Ok(Self::unbound());
        }
        if let Some(rest) = trimmed.strip_prefix("- ") {
            let rest = rest.trim();
            return Ok(if rest.is_empty() {
                Self::unbound()
            } else {
                Self::failed(rest)
            });
        }
        DeviceSummary::parse(trimmed).map(DeviceReply::Bound)
    }

    pub fn summary(&self) -> Option<&DeviceSummary> {
        match self {
            DeviceReply::Bound(summary) => Some(summary),
            DeviceReply::Unbound { .. } => None,
        }
    }
}

impl fmt::Display for DeviceReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceReply::Bound(summary) => summary.fmt(f),
            DeviceReply::Unbound { error: None } => f.write_str(UNBOUND),
            DeviceReply::Unbound { error: Some(err) } => write!(f, "{} {}", UNBOUND, err),
        }
    }
}

/// Separator characters cannot appear inside a field.
fn field(text: &str) -> String {
    text.replace(['|', ','], "_")
}
