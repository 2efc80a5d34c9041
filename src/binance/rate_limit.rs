// =============================================================================
// RateLimiter — shared token bucket pacing all exchange requests
// =============================================================================
//
// Every sync task against the same exchange draws from one bucket, so many
// concurrent series cannot collectively exceed the exchange's request budget.
// Tokens refill continuously at `refill_per_sec` up to `capacity`; `acquire`
// suspends the caller until a token is available.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = Instant::now();
    }

    /// Take one token, suspending until one refills if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let deficit = 1.0 - state.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter pacing request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (diagnostics only).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}
