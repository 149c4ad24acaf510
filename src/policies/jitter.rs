//! # Jitter policy for retry delays.
//!
//! [`JitterPolicy`] adds randomness to backoff delays so that a fleet of
//! devices restarting at the same moment does not hammer the bridge daemon
//! in lockstep.
//!
//! - [`JitterPolicy::None`] — no randomization, predictable delays
//! - [`JitterPolicy::Full`] — random delay in [0, delay]
//! - [`JitterPolicy::Equal`] — delay/2 + random[0, delay/2] (balanced)

use rand::Rng;
use std::time::Duration;

/// Policy controlling randomization of retry delays.
///
/// ## Trade-offs
/// - **None**: Predictable, but risks thundering herd
/// - **Full**: Maximum randomness, aggressive load spreading
/// - **Equal**: Balanced; preserves ~75% of the original delay on average
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// No jitter: use the exact backoff delay.
    ///
    /// The default; appropriate when only one worker is restarting or when
    /// predictable timing matters (tests).
    #[default]
    None,

    /// Full jitter: random delay in [0, delay].
    Full,

    /// Equal jitter: delay/2 + random[0, delay/2].
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => full_jitter(delay),
            JitterPolicy::Equal => equal_jitter(delay),
        }
    }
}

/// Full jitter: random[0, delay]
fn full_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rng.random_range(0..=ms))
}

/// Equal jitter: delay/2 + random[0, delay/2]
fn equal_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let ms = delay.as_millis() as u64;
    if ms == 0 {
        return Duration::ZERO;
    }
    let half = ms / 2;
    let jitter = if half == 0 {
        0
    } else {
        rng.random_range(0..=half)
    };
    Duration::from_millis(half + jitter)
}
