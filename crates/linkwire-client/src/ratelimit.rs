use std::sync::{Mutex, PoisonError};

use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Token bucket admission control for outbound sends.
///
/// `0 <= tokens <= burst` always holds. Denied sends are never queued.
#[derive(Debug)]
pub struct TokenBucket {
    enabled: bool,
    rate_per_sec: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::new_at(config, Instant::now())
    }

    pub fn new_at(config: &RateLimitConfig, now: Instant) -> Self {
        let burst = f64::from(config.burst.max(1));
        Self {
            enabled: config.enabled,
            rate_per_sec: config.rate_per_sec.max(0.0),
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: now,
            }),
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self::new(&RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        })
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Refill for the time elapsed up to `now`, then take one token if any.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        if !self.enabled {
            return true;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
        state.last_refill = state.last_refill.max(now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently held, without refilling.
    pub fn available(&self) -> f64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}
