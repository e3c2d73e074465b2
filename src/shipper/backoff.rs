//! Exponential backoff gate for timer-driven reconnection attempts.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::config::BackoffPolicy;

const MIN_DELAY_MS: u64 = 10;

/// Tracks consecutive connection failures and when the next periodic attempt
/// may run. Forced flushes bypass the gate.
pub struct BackoffState {
    policy: BackoffPolicy,
    current: Duration,
    failures: u32,
    retry_at: Option<Instant>,
    rng: StdRng,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.base,
            failures: 0,
            retry_at: None,
            rng: StdRng::from_entropy(),
            policy,
        }
    }

    /// Whether a periodic attempt is allowed at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    /// Clear the failure streak after a connection was secured.
    pub fn record_success(&mut self) {
        self.current = self.policy.base;
        self.failures = 0;
        self.retry_at = None;
    }

    /// Register a failed attempt and return the jittered delay before the
    /// next periodic one.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        if self.failures > 0 {
            self.current = self.current.saturating_mul(2).min(self.policy.cap);
        }
        self.failures = self.failures.saturating_add(1);

        let max_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;
        let delay_ms = match max_ms {
            0 => MIN_DELAY_MS,
            1..=MIN_DELAY_MS => max_ms,
            _ => self.rng.gen_range(MIN_DELAY_MS..=max_ms),
        };
        let delay = Duration::from_millis(delay_ms);
        self.retry_at = Some(now + delay);
        delay
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
