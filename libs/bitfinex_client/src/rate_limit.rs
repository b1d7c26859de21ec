//! Rate limiter for the Bitfinex REST API.
//!
//! Authenticated endpoints allow roughly 90 requests per minute; the public
//! ones are looser. Reads and writes get separate buckets so a burst of
//! offer submissions never starves the balance and book queries.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Dual rate limiter with separate buckets for reads and writes.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    read_limiter: Arc<DirectLimiter>,
    write_limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// Create with conservative per-minute limits.
    pub fn new() -> Self {
        Self::with_limits(60, 30)
    }

    /// Create with custom per-minute limits. Zero is treated as one.
    pub fn with_limits(reads_per_min: u32, writes_per_min: u32) -> Self {
        let read_quota = Quota::per_minute(NonZeroU32::new(reads_per_min).unwrap_or(NonZeroU32::MIN));
        let write_quota =
            Quota::per_minute(NonZeroU32::new(writes_per_min).unwrap_or(NonZeroU32::MIN));

        Self {
            read_limiter: Arc::new(GovLimiter::direct(read_quota)),
            write_limiter: Arc::new(GovLimiter::direct(write_quota)),
        }
    }

    /// Wait until a read slot is available.
    pub async fn wait_read(&self) {
        self.read_limiter.until_ready().await;
    }

    /// Wait until a write slot is available.
    pub async fn wait_write(&self) {
        self.write_limiter.until_ready().await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
