//! # Cool-down schedule for restarts and retries.
//!
//! [`BackoffPolicy`] answers one question: after the n-th consecutive
//! failure, how long to wait before trying again. The supervisor uses it
//! for the crash→respawn cool-down (a constant 5s by default); callers
//! hammering a flaky bridge daemon can configure growth and jitter.
//!
//! Delays are a pure function of the attempt number, so a policy value can
//! be shared freely and needs no per-worker state.

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Cool-down schedule: `first × factor^attempt`, capped at `max`, then
/// jittered.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound on any computed delay.
    pub max: Duration,
    /// Growth per attempt; `1.0` keeps the delay constant.
    pub factor: f64,
    /// Randomization applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant 100ms delays capped at 30s, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    ///
    /// Any overflowing, negative, or non-finite intermediate lands on
    /// `max` rather than panicking.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let grown = self.first.as_millis() as f64 * self.factor.powi(attempt.min(1024) as i32);
        let capped_ms = self.max.as_millis() as f64;

        let base = if grown.is_finite() && (0.0..=capped_ms).contains(&grown) {
            Duration::from_millis(grown as u64)
        } else {
            self.max
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn constant_factor_yields_the_same_cooldown_every_time() {
        let p = policy(5_000, 60_000, 1.0);
        for attempt in 0..12 {
            assert_eq!(p.delay_for(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn doubling_grows_until_the_cap() {
        let p = policy(100, 1_000, 2.0);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.delay_for(4), Duration::from_secs(1));
        assert_eq!(p.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn first_larger_than_cap_is_capped() {
        let p = policy(10_000, 3_000, 2.0);
        assert_eq!(p.delay_for(0), Duration::from_secs(3));
    }

    #[test]
    fn huge_attempt_numbers_do_not_panic() {
        let p = policy(100, 10_000, 2.0);
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn full_jitter_never_exceeds_the_capped_delay() {
        let p = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..policy(800, 800, 1.0)
        };
        for _ in 0..100 {
            assert!(p.delay_for(0) <= Duration::from_millis(800));
        }
    }

    #[test]
    fn equal_jitter_keeps_at_least_half() {
        let p = BackoffPolicy {
            jitter: JitterPolicy::Equal,
            ..policy(1_000, 30_000, 1.0)
        };
        for attempt in 0..50 {
            let d = p.delay_for(attempt);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1_000));
        }
    }
}
