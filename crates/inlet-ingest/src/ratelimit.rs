//! Per-sender token bucket.
//!
//! Capacity is the burst limit `L`; the bucket refills continuously at
//! `L / 60` tokens per second. Refill is computed lazily on each check from
//! the monotonic clock, and stale buckets are evicted opportunistically on the
//! same path once the map grows past its cap.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use inlet_core::config::RateLimitConfig;
use inlet_core::types::SenderId;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct UserRateLimiter {
    buckets: Mutex<HashMap<SenderId, Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
    max_entries: usize,
    stale_after: Duration,
}

impl UserRateLimiter {
    pub fn new(per_user_limit: u32, max_entries: usize, stale_after: Duration) -> Self {
        let capacity = f64::from(per_user_limit);
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity,
            refill_per_sec: capacity / 60.0,
            max_entries,
            stale_after,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.per_user_limit,
            config.max_tracked_users,
            Duration::from_secs(config.stale_after_secs),
        )
    }

    /// Consume one token for `sender` if available.
    ///
    /// Denials do not consume anything.
    pub fn allow(&self, sender: SenderId) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter poisoned");

        if buckets.len() >= self.max_entries && !buckets.contains_key(&sender) {
            self.evict_stale(&mut buckets, now);
        }

        let bucket = buckets.entry(sender).or_insert(Bucket {
            tokens: self.capacity,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_seen).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_seen = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(sender = %sender, tokens = bucket.tokens, "rate limit bucket empty");
            false
        }
    }

    /// Number of senders currently tracked.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().expect("rate limiter poisoned").len()
    }

    /// Drop buckets idle for longer than `stale_after`. Fresh buckets are kept
    /// even if the map stays above its cap.
    fn evict_stale(&self, buckets: &mut HashMap<SenderId, Bucket>, now: Instant) {
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_seen) < self.stale_after);
        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, remaining = buckets.len(), "evicted stale rate limit buckets");
        }
    }
}
