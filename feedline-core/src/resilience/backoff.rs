//! Exponential backoff for reconnection
//!
//! `delay_for(attempt) = min(initial * 2^attempt, max) + jitter`, where the
//! jitter is drawn uniformly from `[0, jitter_bound)` to keep many clients
//! from retrying in lockstep.
//!
//! The jitter source is injected so tests can pin the random component.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Source of the random component added to each delay
pub trait JitterSource: Send {
    /// Return a duration in `[0, bound)`. A zero bound must yield zero.
    fn jitter(&mut self, bound: Duration) -> Duration;
}

/// Uniform jitter from a seedable RNG
#[derive(Debug, Clone)]
pub struct RandomJitter {
    rng: StdRng,
}

impl RandomJitter {
    /// Seeded from OS entropy
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for RandomJitter {
    fn jitter(&mut self, bound: Duration) -> Duration {
        let bound_ms = bound.as_millis().min(u64::MAX as u128) as u64;
        if bound_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.gen_range(0..bound_ms))
    }
}

/// Always returns the same jitter, clamped below the bound
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&mut self, bound: Duration) -> Duration {
        if bound.is_zero() {
            return Duration::ZERO;
        }
        self.0.min(bound.saturating_sub(Duration::from_millis(1)))
    }
}

/// Backoff constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on the exponential part
    pub max_delay: Duration,
    /// Exclusive upper bound of the random addend
    pub jitter_bound: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            jitter_bound: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    /// Short delays for tests and local development
    pub fn aggressive() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            jitter_bound: Duration::from_millis(10),
        }
    }

    /// Deterministic part of the delay: `min(initial * 2^attempt, max)`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;

        // 2^attempt saturates at u64::MAX once the shift would overflow
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    /// Full delay for `attempt` (0-based), including jitter
    pub fn delay_for(&self, attempt: u32, jitter: &mut dyn JitterSource) -> Duration {
        self.base_delay(attempt) + jitter.jitter(self.jitter_bound)
    }
}
