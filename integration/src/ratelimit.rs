//! Async token bucket modelling a venue's shared rate limit.
//!
//! One bucket per endpoint class; callers acquire a token before issuing a
//! request and suspend until one is available. Waiting callers queue on the
//! internal mutex, so grants are handed out in arrival order.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket with continuous refill.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A bucket holding at most `capacity` tokens, refilling at
    /// `refill_per_sec` tokens per second. The bucket starts full.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        assert!(refill_per_sec > 0.0, "refill rate must be positive");
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, suspending until it is available.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;

            if state.tokens >= 1.0 {
                state.tokens -= 1.0;
                return;
            }

            let deficit = 1.0 - state.tokens;
            let wait = Duration::from_secs_f64(deficit / self.refill_per_sec);
            // Hold the lock while sleeping: later arrivals must not overtake.
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (diagnostics only).
    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
        state.tokens
    }
}
