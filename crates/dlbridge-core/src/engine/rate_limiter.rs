//! Token bucket rate limiter for transfer throttling
//!
//! One limiter is shared by every range worker of a transfer, so the cap
//! applies to the transfer's aggregate speed. The limit can be changed while
//! workers are waiting on it.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Largest slice of tokens taken in one step, so concurrent workers
/// interleave fairly
const MAX_ACQUIRE: u64 = 8 * 1024;

/// Longest single sleep while waiting for tokens
const MAX_WAIT: Duration = Duration::from_millis(50);

/// Shared token bucket
#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<RateLimiterState>>,
}

#[derive(Debug)]
struct RateLimiterState {
    /// Maximum tokens (bytes) in the bucket
    capacity: u64,
    /// Current available tokens
    tokens: f64,
    /// Last token refill time
    last_refill: Instant,
    /// Tokens added per second (the speed limit)
    refill_rate: u64,
    is_unlimited: bool,
}

impl RateLimiter {
    /// Create a limiter for `bytes_per_second`; 0 means unlimited
    pub fn new(bytes_per_second: u64) -> Self {
        let mut state = RateLimiterState {
            capacity: u64::MAX,
            tokens: f64::MAX,
            last_refill: Instant::now(),
            refill_rate: u64::MAX,
            is_unlimited: true,
        };
        if bytes_per_second > 0 {
            state.limit_to(bytes_per_second);
            // start with a full bucket
            state.tokens = bytes_per_second as f64;
        }

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Create an unlimited rate limiter (no throttling)
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Update the speed limit; 0 means unlimited
    pub async fn set_limit(&self, bytes_per_second: u64) {
        let mut state = self.state.lock().await;
        if bytes_per_second == 0 || bytes_per_second == u64::MAX {
            state.capacity = u64::MAX;
            state.refill_rate = u64::MAX;
            state.tokens = f64::MAX;
            state.is_unlimited = true;
        } else {
            let was_unlimited = state.is_unlimited;
            state.limit_to(bytes_per_second);
            state.tokens = if was_unlimited {
                bytes_per_second as f64
            } else {
                state.tokens.min(bytes_per_second as f64)
            };
            state.last_refill = Instant::now();
        }
    }

    pub async fn is_unlimited(&self) -> bool {
        self.state.lock().await.is_unlimited
    }

    /// Wait until `bytes` may be transferred
    pub async fn acquire(&self, bytes: u64) {
        let mut remaining = bytes;
        while remaining > 0 {
            let slice = remaining.min(MAX_ACQUIRE);
            if !self.acquire_slice(slice).await {
                return;
            }
            remaining -= slice;
        }
    }

    /// Returns false when the limiter is unlimited and the rest of the
    /// request can be skipped
    async fn acquire_slice(&self, bytes: u64) -> bool {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if state.is_unlimited {
                    return false;
                }

                state.refill();

                // a slice larger than the bucket is taken on credit once the bucket is full
                let threshold = (bytes as f64).min(state.capacity as f64);
                if state.tokens >= threshold {
                    state.tokens -= bytes as f64;
                    return true;
                }

                let needed = threshold - state.tokens;
                Duration::from_secs_f64(needed / state.refill_rate as f64).min(MAX_WAIT)
            };

            // sleep outside the lock so other workers can check
            if wait > Duration::ZERO {
                tokio::time::sleep(wait).await;
            }
        }
    }
}

impl RateLimiterState {
    fn limit_to(&mut self, bytes_per_second: u64) {
        self.capacity = bytes_per_second;
        self.refill_rate = bytes_per_second;
        self.is_unlimited = false;
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.last_refill).as_secs_f64();

        if elapsed_secs > 0.001 {
            let new_tokens = elapsed_secs * self.refill_rate as f64;
            self.tokens = (self.tokens + new_tokens).min(self.capacity as f64);
            self.last_refill = now;
        }
    }
}
