//! Exponential backoff with jitter, one counter per connection layer.
//!
//! Retries are deadlines, not sleeps: the state machine asks [`Backoff::ready`]
//! on every tick and only starts a new attempt once the deadline has passed.

use embassy_time::{Duration, Instant};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::ConfigError;

/// Retry schedule for one connection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Growth factor applied per further failure.
    pub multiplier: u32,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Up to this percentage of a delay is randomly shaved off.
    pub jitter_percent: u8,
}

impl BackoffPolicy {
    pub const fn new(initial: Duration, multiplier: u32, max: Duration) -> Self {
        Self {
            initial,
            multiplier,
            max,
            jitter_percent: 20,
        }
    }

    pub const fn with_jitter(mut self, percent: u8) -> Self {
        self.jitter_percent = percent;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial.as_ticks() == 0
            || self.multiplier == 0
            || self.max < self.initial
            || self.jitter_percent > 100
        {
            return Err(ConfigError::InvalidBackoff);
        }
        Ok(())
    }

    /// Delay before retrying after `failures` consecutive failures, without
    /// jitter. `failures` starts at 1.
    pub fn base_delay(&self, failures: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 1..failures {
            delay = match delay.checked_mul(self.multiplier) {
                Some(next) if next < self.max => next,
                _ => return self.max,
            };
        }
        delay.min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2, Duration::from_secs(60))
    }
}

/// Attempt counter and retry deadline for one layer.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
    retry_at: Option<Instant>,
    rng: SmallRng,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy, seed: u32) -> Self {
        Self {
            policy,
            failures: 0,
            retry_at: None,
            rng: SmallRng::seed_from_u64(u64::from(seed)),
        }
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// When the next attempt is allowed, if a failure is pending.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    /// Records a failed attempt and returns the delay until the next one.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let base = self.policy.base_delay(self.failures);
        let delay = self.apply_jitter(base);
        self.retry_at = Some(now.checked_add(delay).unwrap_or(now));
        delay
    }

    /// Clears the counter after a successful connection.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    fn apply_jitter(&mut self, base: Duration) -> Duration {
        let span = base.as_ticks().saturating_mul(self.policy.jitter_percent as u64) / 100;
        if span == 0 {
            return base;
        }
        let shave = self.rng.gen_range(0..=span);
        Duration::from_ticks(base.as_ticks() - shave)
    }
}
