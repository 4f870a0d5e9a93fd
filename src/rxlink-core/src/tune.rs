// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Requested vs. achieved frequencies from a single tune operation.
///
/// The baseband offset is the shift the digital stage applies to bring the
/// achieved RF frequency back onto the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    pub target_rf_hz: f64,
    pub actual_rf_hz: f64,
    pub target_baseband_hz: f64,
    pub actual_baseband_hz: f64,
}

impl TuneResult {
    /// A tune that landed exactly on target.
    #[must_use]
    pub fn exact(hz: f64) -> Self {
        Self {
            target_rf_hz: hz,
            actual_rf_hz: hz,
            target_baseband_hz: 0.0,
            actual_baseband_hz: 0.0,
        }
    }

    /// Achieved minus requested RF frequency.
    pub fn residual_hz(&self) -> f64 {
        self.actual_rf_hz - self.target_rf_hz
    }

    /// Compare achieved against requested. Without a tolerance the
    /// comparison is exact.
    pub fn verdict(&self, tolerance_hz: Option<f64>) -> TuneVerdict {
        let tolerance = tolerance_hz.map(f64::abs).unwrap_or(0.0);
        let residual = self.residual_hz();
        if residual < -tolerance {
            TuneVerdict::Low
        } else if residual > tolerance {
            TuneVerdict::High
        } else {
            TuneVerdict::OnTarget
        }
    }
}

/// Outcome of the most recent tune relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuneVerdict {
    Low,
    OnTarget,
    High,
}

impl TuneVerdict {
    /// -1 below target, 0 within tolerance, +1 above.
    pub fn as_i8(self) -> i8 {
        match self {
            TuneVerdict::Low => -1,
            TuneVerdict::OnTarget => 0,
            TuneVerdict::High => 1,
        }
    }

    /// Wire token, `None` when on target.
    pub fn token(self) -> Option<&'static str> {
        match self {
            TuneVerdict::Low => Some("LOW"),
            TuneVerdict::OnTarget => None,
            TuneVerdict::High => Some("HIGH"),
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "LOW" => Some(TuneVerdict::Low),
            "HIGH" => Some(TuneVerdict::High),
            _ => None,
        }
    }
}
