//! Outbound request pacing for the aggregator.
//!
//! Wraps a governor direct limiter. Each 429 halves the quota (down to a
//! floor) and each accepted reply raises it by one toward the base rate.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use tracing::{debug, warn};

pub struct RequestPacer {
    limiter: DefaultDirectRateLimiter,
    base_quota: u32,
    current_quota: u32,
    min_quota: u32,
}

impl RequestPacer {
    pub fn new(requests_per_second: u32) -> Self {
        let base_quota = requests_per_second.max(1);
        Self {
            limiter: RateLimiter::direct(quota_for(base_quota)),
            base_quota,
            current_quota: base_quota,
            min_quota: (base_quota / 4).max(1),
        }
    }

    /// Wait until the next request may be sent.
    pub async fn until_ready(&self) {
        self.limiter.until_ready().await;
    }

    /// Tighten the quota after the aggregator answered 429.
    pub fn record_rate_limited(&mut self) {
        let reduced = (self.current_quota / 2).max(self.min_quota);
        if reduced != self.current_quota {
            warn!("Aggregator rate limited, reducing pace from {} to {} req/s", self.current_quota, reduced);
            self.set_quota(reduced);
        }
    }

    /// Relax the quota by one step after an accepted reply.
    pub fn record_success(&mut self) {
        if self.current_quota < self.base_quota {
            let raised = self.current_quota + 1;
            debug!("Raising pace from {} to {} req/s", self.current_quota, raised);
            self.set_quota(raised);
        }
    }

    pub fn current_quota(&self) -> u32 {
        self.current_quota
    }

    fn set_quota(&mut self, quota: u32) {
        self.current_quota = quota;
        self.limiter = RateLimiter::direct(quota_for(quota));
    }
}

fn quota_for(requests_per_second: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
}
