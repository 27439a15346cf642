//! Outbound pacing.
//!
//! Platforms throttle bots per chat (Telegram: about one message per second
//! per chat). Sends wait for a slot instead of collecting 429s.

use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::num::NonZeroU32;

/// Per-destination rate limiter.
pub struct OutboundLimiter {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl OutboundLimiter {
    /// Allow `per_second` sends per destination with a burst of `burst`.
    #[must_use]
    pub fn new(per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Wait until a send to `destination` is allowed.
    pub async fn acquire(&self, destination: &str) {
        self.limiter.until_key_ready(&destination.to_string()).await;
    }

    /// Take a slot without waiting.
    #[must_use]
    pub fn try_acquire(&self, destination: &str) -> bool {
        self.limiter.check_key(&destination.to_string()).is_ok()
    }
}

impl Default for OutboundLimiter {
    fn default() -> Self {
        Self::new(1, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_throttle() {
        let limiter = OutboundLimiter::new(1, 2);
        assert!(limiter.try_acquire("chat-1"));
        assert!(limiter.try_acquire("chat-1"));
        assert!(!limiter.try_acquire("chat-1"));

        // Separate destinations have separate budgets
        assert!(limiter.try_acquire("chat-2"));
    }

    #[tokio::test]
    async fn test_acquire_within_burst_does_not_wait() {
        let limiter = OutboundLimiter::new(1, 3);
        let start = std::time::Instant::now();
        limiter.acquire("chat").await;
        limiter.acquire("chat").await;
        assert!(start.elapsed() < std::time::Duration::from_millis(500));
    }
}
