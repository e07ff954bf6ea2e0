//! Reconnect delays: exponential, capped, with proportional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RelayConfig;

/// Exponential backoff calculator.
///
/// The n-th delay (from zero) is `min(base * 2^n, max)`, then reduced by a
/// random amount of up to `jitter` of itself so that clients dropped by the
/// same outage do not reconnect in lockstep.
#[derive(Clone, Debug)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff sequence. `max_attempts` of 0 means unlimited.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32, jitter: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: (max_attempts > 0).then_some(max_attempts),
            jitter: sanitize_jitter(jitter),
            attempt: 0,
        }
    }

    /// Backoff configured from a [`RelayConfig`].
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.reconnect_delay,
            config.max_reconnect_delay,
            config.max_reconnect_attempts,
            config.jitter,
        )
    }

    /// The undelayed exponential step for `attempt`, capped at the maximum.
    #[must_use]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Next delay, or `None` once the attempt limit is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let capped = self.capped_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter <= 0.0 {
            return Some(capped);
        }
        let reduction = rand::thread_rng().gen_range(0.0..=self.jitter);
        Some(capped.mul_f64(1.0 - reduction))
    }

    /// Resets after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the attempt limit has been reached.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.max_attempts.is_some_and(|max| self.attempt >= max)
    }
}

/// Clamps `jitter` into `[0, 1]`. Non-finite values disable jitter.
pub(crate) fn sanitize_jitter(jitter: f64) -> f64 {
    if jitter.is_finite() {
        jitter.clamp(0.0, 1.0)
    } else {
        tracing::warn!(jitter, "non-finite reconnect jitter, disabling jitter");
        0.0
    }
}
