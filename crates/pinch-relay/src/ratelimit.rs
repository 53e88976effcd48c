//! Per-sender token-bucket rate limiting, lazily created and keyed by
//! authenticated sender address — grounded on `nostr-relay`'s use of
//! `governor` for the same purpose.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;

use crate::config::{RATE_LIMIT_BURST, RATE_LIMIT_TOKENS_PER_SEC};

type Limiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

pub struct SenderRateLimiters {
    buckets: RwLock<HashMap<String, Arc<Limiter>>>,
}

impl SenderRateLimiters {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn build_limiter() -> Limiter {
        let per_sec = NonZeroU32::new(RATE_LIMIT_TOKENS_PER_SEC).expect("nonzero rate");
        let burst = NonZeroU32::new(RATE_LIMIT_BURST).expect("nonzero burst");
        RateLimiter::direct(Quota::per_second(per_sec).allow_burst(burst))
    }

    /// Check and consume a single token for `sender`, creating its
    /// bucket on first use. Returns `true` if the message may proceed.
    pub async fn check(&self, sender: &str) -> bool {
        {
            let buckets = self.buckets.read().await;
            if let Some(limiter) = buckets.get(sender) {
                return limiter.check().is_ok();
            }
        }

        let mut buckets = self.buckets.write().await;
        let limiter = buckets
            .entry(sender.to_string())
            .or_insert_with(|| Arc::new(Self::build_limiter()));
        limiter.check().is_ok()
    }
}

impl Default for SenderRateLimiters {
    fn default() -> Self {
        Self::new()
    }
}
