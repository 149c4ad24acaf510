//! Bookkeeping records owned by the connection pool.
//!
//! Both record types are private pool state: single-writer, mutated only
//! between suspension points, and bounded by the staleness sweep.

use std::time::{Duration, Instant};

/// Health bookkeeping for one bridge session.
///
/// Owned exclusively by the pool; removed by the sweep once unused past the
/// idle-eviction threshold.
#[derive(Debug, Clone)]
pub(super) struct ConnectionRecord {
    /// When the session was last used successfully.
    pub last_used_at: Instant,
    /// Whether the last probe (or use) succeeded.
    ///
    /// An unhealthy record forces a re-probe before the next dispatch on
    /// this serial, regardless of freshness.
    pub healthy: bool,
}

impl ConnectionRecord {
    pub fn touched_now() -> Self {
        Self {
            last_used_at: Instant::now(),
            healthy: true,
        }
    }

    /// True when the record was used recently enough to skip the probe.
    pub fn is_fresh(&self, window: Duration) -> bool {
        self.healthy && self.last_used_at.elapsed() < window
    }

    /// True when the record has gone unused past the eviction threshold.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.last_used_at.elapsed() >= threshold
    }
}

/// TTL-bounded memoization of one device-discovery lookup.
#[derive(Debug, Clone)]
pub(super) struct SerialCacheEntry {
    /// The discovered bridge serial.
    pub serial: String,
    /// When this entry stops being served.
    pub expires_at: Instant,
}

impl SerialCacheEntry {
    pub fn new(serial: String, ttl: Duration) -> Self {
        Self {
            serial,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}
