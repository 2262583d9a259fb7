// src/backoff.rs
//! Delay policies: geometric reconnect backoff for workers and jittered
//! exponential retry for webhook deliveries.

use std::time::Duration;

use rand::Rng;

/// Reconnect delay state for one worker.
///
/// Each failure returns the current delay and doubles it up to `max`.
/// Delays never decrease until `reset` is called, which happens only after a
/// connection stayed open past the stability threshold.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Delay to wait before the next connection attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// The delay `next_delay` would return, without advancing.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Jump straight to the ceiling, for failures a quick retry won't fix.
    pub fn saturate(&mut self) {
        self.current = self.max;
    }
}

/// Retry policy for a single delivery.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter in [0, base_delay/2), still bounded by `max_delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let limit = jitter_range_ms.min(remaining_ms);
        if limit == 0 {
            return capped;
        }
        let jitter_ms = rand::rng().random_range(0..limit);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}
