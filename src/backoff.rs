//! Reconnection delay policy.

use std::fmt;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};

use crate::config::ReconnectConfig;

/// Computes how long to wait before the next connection attempt.
///
/// The policy starts idle (next delay is [`ReconnectConfig::idle_delay`], zero by default). Every
/// [`mark_failure`](Self::mark_failure) advances an exponential sequence capped at
/// [`ReconnectConfig::max_backoff`] and adds up to [`ReconnectConfig::jitter`] of random delay.
/// Delays never decrease across consecutive failures. No I/O happens here; with a fixed
/// [`ReconnectConfig::seed`] the sequence is fully deterministic.
pub struct BackoffPolicy {
    exponential: ExponentialBackoff,
    rng: StdRng,
    idle_delay: Duration,
    jitter: Duration,
    ceiling: Duration,
    attempts: u32,
    next_delay: Duration,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            exponential: config.into(),
            rng,
            idle_delay: config.idle_delay,
            jitter: config.jitter,
            ceiling: config.max_backoff,
            attempts: 0,
            next_delay: config.idle_delay,
        }
    }

    /// Delay to wait before the next attempt.
    #[must_use]
    pub fn time_to_next_attempt(&self) -> Duration {
        self.next_delay
    }

    /// Consecutive failures since the last success or reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether the policy is at its idle baseline.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.attempts == 0
    }

    pub fn mark_success(&mut self) {
        self.reset_to_idle();
    }

    pub fn mark_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);

        let base = self.exponential.next_backoff().unwrap_or(self.ceiling);
        let candidate = base.saturating_add(self.sample_jitter()).min(self.ceiling);

        self.next_delay = candidate.max(self.next_delay);
    }

    /// Returns to the baseline without recording a success, e.g. when an attempt is abandoned.
    pub fn reset_to_idle(&mut self) {
        self.exponential.reset();
        self.attempts = 0;
        self.next_delay = self.idle_delay;
    }

    fn sample_jitter(&mut self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }

        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.rng.random_range(0..=bound))
    }
}

impl Backoff for BackoffPolicy {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.mark_failure();
        Some(self.next_delay)
    }

    fn reset(&mut self) {
        self.reset_to_idle();
    }
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("attempts", &self.attempts)
            .field("next_delay", &self.next_delay)
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}
