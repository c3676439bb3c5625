//! Retry delays for failed passes

use rand::Rng;
use std::time::Duration;

use crate::config::ReconcileConfig;

/// Exponential backoff with a ceiling and optional jitter
///
/// `delay(n) = min(base * 2^(n-1), ceiling)`; with jitter the delay is
/// stretched by up to 25% and clamped to the ceiling again, so successive
/// delays never decrease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration, jitter: bool) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            jitter,
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.base_backoff(), config.max_backoff(), config.jitter)
    }

    /// Delay before retrying after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        let nominal = self.nominal(failures);
        if !self.jitter {
            return nominal;
        }
        let stretch = rand::thread_rng().gen_range(0.0..0.25);
        nominal.mul_f64(1.0 + stretch).min(self.ceiling)
    }

    fn nominal(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.ceiling)
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}
