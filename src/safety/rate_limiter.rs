//! Per-caller token-bucket rate limiting at the gateway ingress (§4.5, §9.1).
//! Generalizes the teacher's per-tool `RateLimiter`
//! (fixed buckets keyed by tool name) into a `governor`-backed bucket keyed
//! by caller id, checked ahead of schema validation so an over-quota caller
//! never reaches the orchestrator.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use tokio::sync::RwLock;

type Bucket = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One bucket per caller id, created lazily on first use and sized
/// identically (`burst` tokens, refilling `per_minute` per minute).
pub struct CallerRateLimiter {
    per_minute: u32,
    burst: u32,
    clock: DefaultClock,
    buckets: RwLock<HashMap<String, Arc<Bucket>>>,
}

impl CallerRateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self { per_minute: per_minute.max(1), burst: burst.max(1), clock: DefaultClock::default(), buckets: RwLock::new(HashMap::new()) }
    }

    fn quota(&self) -> Quota {
        let per_minute = NonZeroU32::new(self.per_minute).unwrap();
        let burst = NonZeroU32::new(self.burst).unwrap();
        Quota::per_minute(per_minute).allow_burst(burst)
    }

    async fn bucket_for(&self, caller_id: &str) -> Arc<Bucket> {
        {
            let buckets = self.buckets.read().await;
            if let Some(bucket) = buckets.get(caller_id) {
                return bucket.clone();
            }
        }
        let mut buckets = self.buckets.write().await;
        buckets.entry(caller_id.to_string()).or_insert_with(|| Arc::new(GovernorLimiter::direct(self.quota()))).clone()
    }

    /// `true` if `caller_id` has a token available right now (and consumes
    /// one); `false` if the caller is over quota.
    pub async fn check(&self, caller_id: &str) -> bool {
        self.bucket_for(caller_id).await.check().is_ok()
    }

    /// Seconds until `caller_id`'s next token, for a `Retry-After` header.
    pub async fn retry_after_secs(&self, caller_id: &str) -> u64 {
        match self.bucket_for(caller_id).await.check() {
            Ok(_) => 0,
            Err(not_until) => not_until.wait_time_from(self.clock.now()).as_secs().max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_burst_then_rejects() {
        let limiter = CallerRateLimiter::new(60, 3);
        assert!(limiter.check("caller-a").await);
        assert!(limiter.check("caller-a").await);
        assert!(limiter.check("caller-a").await);
        assert!(!limiter.check("caller-a").await);
    }

    #[tokio::test]
    async fn callers_have_independent_buckets() {
        let limiter = CallerRateLimiter::new(60, 1);
        assert!(limiter.check("caller-a").await);
        assert!(!limiter.check("caller-a").await);
        assert!(limiter.check("caller-b").await);
    }
}
