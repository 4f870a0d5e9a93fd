// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Reconnect policy for the control-plane client.
//!
//! Attempt counts follow the usual convention: 0 disables reconnecting, a
//! positive count bounds it, a negative count retries forever. The delay
//! between attempts is fixed.

use std::time::Duration;

/// Fixed-delay reconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempts: i32,
    interval: Duration,
}

impl ReconnectPolicy {
    pub fn new(attempts: i32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Never reconnect.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Reconnect forever.
    pub fn unbounded(interval: Duration) -> Self {
        Self::new(-1, interval)
    }

    pub fn attempts(&self) -> i32 {
        self.attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn budget(&self) -> ReconnectBudget {
        ReconnectBudget {
            configured: self.attempts,
            remaining: self.attempts,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(5))
    }
}

/// Remaining reconnect attempts.
///
/// The counter only decreases until `reset` is called after a successful
/// connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBudget {
    configured: i32,
    remaining: i32,
}

impl ReconnectBudget {
    pub fn remaining(&self) -> i32 {
        self.remaining
    }

    pub fn is_unbounded(&self) -> bool {
        self.configured < 0
    }

    /// Take one attempt from the budget. Returns false once exhausted.
    pub fn try_consume(&mut self) -> bool {
        if self.remaining < 0 {
            return true;
        }
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn reset(&mut self) {
        self.remaining = self.configured;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_attempts_never_retries() {
        let mut budget = ReconnectPolicy::none().budget();
        assert!(!budget.try_consume());
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn bounded_budget_is_monotonic_until_reset() {
        let mut budget = ReconnectPolicy::new(3, Duration::from_millis(10)).budget();
        let mut seen = vec![budget.remaining()];
        while budget.try_consume() {
            seen.push(budget.remaining());
        }
        assert_eq!(seen, vec![3, 2, 1, 0]);
        assert!(!budget.try_consume());
        budget.reset();
        assert_eq!(budget.remaining(), 3);
    }

    #[test]
    fn negative_attempts_are_unbounded() {
        let mut budget = ReconnectPolicy::unbounded(Duration::from_secs(1)).budget();
        assert!(budget.is_unbounded());
        for _ in 0..1000 {
            assert!(budget.try_consume());
        }
        assert_eq!(budget.remaining(), -1);
    }
}
