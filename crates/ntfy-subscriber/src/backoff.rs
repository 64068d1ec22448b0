//! Reconnect backoff: exponential, capped, with optional jitter.

use std::time::Duration;

use crate::types::TimingConfig;

/// Groups the retry state for the reconnect loop.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    jitter: bool,
    stable_after: Duration,
    /// Consecutive attempts since the last reset.
    attempt: u32,
}

impl Backoff {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            min: timing.backoff_min,
            max: timing.backoff_max.max(timing.backoff_min),
            jitter: timing.backoff_jitter,
            stable_after: timing.stable_after,
            attempt: 0,
        }
    }

    /// Undelayed base for the next attempt: min, 2*min, 4*min, ... capped at max.
    pub fn current(&self) -> Duration {
        let exp = self.attempt.min(30);
        self.min.saturating_mul(1u32 << exp).min(self.max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt; advances the exponent.
    ///
    /// Jitter subtracts up to a quarter of the base, so the result never
    /// exceeds `max`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current();
        self.attempt = self.attempt.saturating_add(1);
        if !self.jitter {
            return base;
        }
        // Use subsecond nanos from wall clock for non-deterministic jitter
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let spread = base / 4;
        let spread_nanos = u64::try_from(spread.as_nanos()).unwrap_or(u64::MAX);
        if spread_nanos == 0 {
            return base;
        }
        base - Duration::from_nanos(u64::from(nanos) % spread_nanos)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Called when a subscribed session ends. A session that stayed up for
    /// `stable_after` means the outage is over, so start again from `min`.
    pub fn on_session_end(&mut self, subscribed_for: Duration) {
        if subscribed_for >= self.stable_after {
            self.reset();
        }
    }
}
