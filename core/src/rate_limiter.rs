//! Shared token-bucket rate limiter, consulted by every symbol task before
//! submit/cancel. One instance is shared across all symbols for
//! `max_new_orders_per_second`, another for `max_cancels_per_second` — a
//! single enforcement point rather than a per-symbol budget, since the
//! limit is venue-wide.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_per_second: u64,
    pub burst_capacity: u64,
}

impl RateLimiterConfig {
    pub fn new(max_per_second: u64, burst_capacity: u64) -> Self {
        Self { max_per_second, burst_capacity }
    }
}

/// Shared token-bucket rate limiter. `allow()` is non-blocking; callers
/// that must not drop work use `time_until_available` to decide whether to
/// wait (bounded by the next refresh interval) or skip.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    tokens_milli: Arc<AtomicU64>,
    last_refill: Arc<Mutex<Instant>>,
    total_requests: Arc<AtomicU64>,
    total_rejected: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            tokens_milli: Arc::new(AtomicU64::new(config.burst_capacity * 1000)),
            last_refill: Arc::new(Mutex::new(Instant::now())),
            total_requests: Arc::new(AtomicU64::new(0)),
            total_rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    fn refill(&self) {
        let mut last = self.last_refill.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(*last);
        if elapsed.as_millis() == 0 {
            return;
        }
        let tokens_to_add = (self.config.max_per_second as f64 * elapsed.as_secs_f64() * 1000.0) as u64;
        if tokens_to_add > 0 {
            let max_tokens = self.config.burst_capacity * 1000;
            let current = self.tokens_milli.load(Ordering::Acquire);
            let updated = (current + tokens_to_add).min(max_tokens);
            self.tokens_milli.store(updated, Ordering::Release);
            *last = now;
        }
    }

    /// Attempts to consume one token. Non-blocking.
    pub fn allow(&self) -> bool {
        self.refill();
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut current = self.tokens_milli.load(Ordering::Acquire);
        loop {
            if current < 1000 {
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                if self.total_rejected.load(Ordering::Relaxed) % 50 == 1 {
                    warn!("rate limiter exhausted: {} requests rejected so far", self.total_rejected.load(Ordering::Relaxed));
                }
                return false;
            }
            match self.tokens_milli.compare_exchange_weak(current, current - 1000, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Minimum wait before a token will be available, used to decide
    /// between "delay" and "skip". A pure peek: refills first but never
    /// consumes a token, so callers can check this before retrying `allow()`.
    pub fn time_until_available(&self) -> Duration {
        self.refill();
        if self.tokens_milli.load(Ordering::Acquire) >= 1000 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(1.0 / self.config.max_per_second.max(1) as f64)
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens_milli.load(Ordering::Acquire) / 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_capacity_allows_then_rejects() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10, 3));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn refills_after_interval() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1000, 1));
        assert!(limiter.allow());
        assert!(!limiter.allow());
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.allow());
    }

    #[test]
    fn shared_clone_sees_same_bucket() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10, 2));
        let clone = limiter.clone();
        assert!(limiter.allow());
        assert!(clone.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn time_until_available_does_not_consume_a_token() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10, 1));
        assert!(limiter.allow());
        assert_eq!(limiter.time_until_available(), Duration::from_secs_f64(0.1));
        // still no tokens: the peek above must not have consumed the one that refilled.
        assert_eq!(limiter.time_until_available(), Duration::from_secs_f64(0.1));
        std::thread::sleep(Duration::from_millis(110));
        assert_eq!(limiter.time_until_available(), Duration::ZERO);
        assert!(limiter.allow());
    }
}
