//! Per-client rate limiting for query traffic.
//!
//! One keyed governor limiter holds a token bucket per client identifier,
//! allowing `requests_per_minute` queries per minute with a burst equal to the
//! per-minute allowance. Buckets are created on a client's first request and
//! dropped by [`RateLimiter::retain_recent`] once they have fully refilled, so
//! a stream of distinct client ids cannot grow the state without bound.

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::error::AppError;

/// Client identifier used when a request carries no `x-client-id` header.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Rate limiter for managing per-client request limits.
pub struct RateLimiter {
    /// `None` when limiting is disabled
    limiter: Option<DefaultKeyedRateLimiter<String>>,
}

impl RateLimiter {
    /// Create a rate limiter allowing `requests_per_minute` per client.
    ///
    /// A value of zero disables limiting entirely.
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            limiter: NonZeroU32::new(requests_per_minute)
                .map(|rpm| GovernorRateLimiter::keyed(Quota::per_minute(rpm))),
        }
    }

    /// Whether any limit is enforced.
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Check if a request is allowed for the given client.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if the request is allowed
    /// * `Err(AppError::RateLimitExceeded)` if the client exhausted its quota
    pub fn check_rate_limit(&self, client_id: &str) -> Result<(), AppError> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        match limiter.check_key(&client_id.to_string()) {
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::warn!(client_id = %client_id, "Rate limit exceeded");
                Err(AppError::RateLimitExceeded(format!(
                    "Too many queries from client {}",
                    client_id
                )))
            }
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.as_ref().map_or(0, |l| l.len())
    }

    /// Forget clients whose bucket has fully refilled.
    ///
    /// A forgotten client starts over with a full bucket, which is exactly the
    /// state it was in, so no limit is loosened.
    pub fn retain_recent(&self) {
        if let Some(limiter) = &self.limiter {
            let before = limiter.len();
            limiter.retain_recent();
            limiter.shrink_to_fit();
            tracing::debug!(
                before,
                after = limiter.len(),
                "Rate limiter buckets pruned"
            );
        }
    }

    /// Run [`retain_recent`](Self::retain_recent) every `interval` until
    /// aborted.
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.retain_recent();
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_within_limit() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            assert!(limiter.check_rate_limit("client-a").is_ok());
        }
    }

    #[test]
    fn test_rate_limiter_blocks_over_limit() {
        let limiter = RateLimiter::new(5);
        for _ in 0..5 {
            assert!(limiter.check_rate_limit("client-a").is_ok());
        }
        let err = limiter.check_rate_limit("client-a").unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded(_)));
    }

    #[test]
    fn test_clients_have_independent_buckets() {
        let limiter = RateLimiter::new(2);
        assert!(limiter.check_rate_limit("client-a").is_ok());
        assert!(limiter.check_rate_limit("client-a").is_ok());
        assert!(limiter.check_rate_limit("client-a").is_err());

        assert!(limiter.check_rate_limit("client-b").is_ok());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_zero_disables_limiting() {
        let limiter = RateLimiter::new(0);
        assert!(!limiter.is_enabled());
        for _ in 0..1000 {
            assert!(limiter.check_rate_limit(ANONYMOUS_CLIENT).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 0);
        limiter.retain_recent();
    }

    #[test]
    fn test_refilled_buckets_are_forgotten() {
        // one token per millisecond, so a single use refills almost at once
        let limiter = RateLimiter::new(60_000);
        for i in 0..500 {
            assert!(limiter.check_rate_limit(&format!("client-{}", i)).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 500);

        std::thread::sleep(Duration::from_millis(20));
        limiter.retain_recent();
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_exhausted_bucket_survives_cleanup() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check_rate_limit("client-a").is_ok());
        assert!(limiter.check_rate_limit("client-a").is_err());

        limiter.retain_recent();
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(limiter.check_rate_limit("client-a").is_err());
    }

    #[tokio::test]
    async fn test_spawn_cleanup_prunes_in_background() {
        let limiter = Arc::new(RateLimiter::new(60_000));
        assert!(limiter.check_rate_limit("client-a").is_ok());

        let task = Arc::clone(&limiter).spawn_cleanup(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();

        assert_eq!(limiter.tracked_clients(), 0);
    }
}
