//! Per-client token bucket rate limiter for the prediction endpoints.
//!
//! Each client IP gets a bucket holding up to `requests_per_minute` tokens,
//! refilled continuously. A request costs one token.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Buckets idle for this long are full again and can be dropped.
const PRUNE_AFTER: Duration = Duration::from_secs(120);

/// Prune at most this often.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded, retry in {retry_after_secs:.1}s")]
    Exceeded { retry_after_secs: f64 },
}

/// Token bucket limiter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    buckets: HashMap<String, Bucket>,
    last_prune: Instant,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` per key, with bursts up to the same amount.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::new_at(requests_per_minute, Instant::now())
    }

    fn new_at(requests_per_minute: u32, now: Instant) -> Self {
        let capacity = requests_per_minute.max(1) as f64;
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            inner: Mutex::new(Inner {
                buckets: HashMap::new(),
                last_prune: now,
            }),
        }
    }

    /// Take one token for `key`.
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        self.check_at(key, Instant::now())
    }

    /// Take one token for `key` as of `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Result<(), RateLimitError> {
        // A poisoned lock only means another request panicked mid-update;
        // the bucket map is still usable.
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if now.saturating_duration_since(inner.last_prune) >= PRUNE_INTERVAL {
            inner
                .buckets
                .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < PRUNE_AFTER);
            inner.last_prune = now;
        }

        let capacity = self.capacity;
        let bucket = inner.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(capacity);
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(RateLimitError::Exceeded {
                retry_after_secs: (1.0 - bucket.tokens) / self.refill_per_sec,
            })
        }
    }

    /// Number of clients currently tracked.
    #[cfg(test)]
    pub fn tracked_clients(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_burst_then_blocks() {
        let start = Instant::now();
        let limiter = RateLimiter::new_at(10, start);

        for _ in 0..10 {
            assert!(limiter.check_at("10.0.0.1", start).is_ok());
        }
        assert!(limiter.check_at("10.0.0.1", start).is_err());
    }

    #[test]
    fn test_clients_are_independent() {
        let start = Instant::now();
        let limiter = RateLimiter::new_at(1, start);

        assert!(limiter.check_at("10.0.0.1", start).is_ok());
        assert!(limiter.check_at("10.0.0.1", start).is_err());
        assert!(limiter.check_at("10.0.0.2", start).is_ok());
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let start = Instant::now();
        let limiter = RateLimiter::new_at(10, start);
        for _ in 0..10 {
            limiter.check_at("client", start).unwrap();
        }

        // 10 per minute = one token every 6 seconds
        assert!(limiter.check_at("client", start + Duration::from_secs(3)).is_err());
        assert!(limiter.check_at("client", start + Duration::from_secs(7)).is_ok());
        assert!(limiter.check_at("client", start + Duration::from_secs(8)).is_err());
    }

    #[test]
    fn test_retry_hint() {
        let start = Instant::now();
        let limiter = RateLimiter::new_at(6, start);
        for _ in 0..6 {
            limiter.check_at("client", start).unwrap();
        }

        let RateLimitError::Exceeded { retry_after_secs } = limiter.check_at("client", start).unwrap_err();
        assert!((retry_after_secs - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_idle_buckets_pruned() {
        let start = Instant::now();
        let limiter = RateLimiter::new_at(10, start);
        limiter.check_at("old", start).unwrap();
        assert_eq!(limiter.tracked_clients(), 1);

        limiter.check_at("new", start + Duration::from_secs(180)).unwrap();
        assert_eq!(limiter.tracked_clients(), 1);
    }
}
