use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::sleep;

use std::time::Duration;

/// Process-wide token bucket throttling outbound model calls. One instance
/// is shared (behind an Arc) by every summarization run so the bot stays
/// under the provider's quota before the provider has to enforce it.
///
/// Passed explicitly everywhere it is needed; tests substitute
/// [`RateLimiter::unthrottled`].
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
    enabled: bool,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(calls_per_minute: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: f64::from(calls_per_minute.max(1)) / 60.0,
            enabled: true,
        }
    }

    /// A limiter that always admits immediately. For tests and for wiring
    /// where throttling is handled elsewhere.
    pub fn unthrottled() -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
            capacity: 0.0,
            refill_per_sec: 0.0,
            enabled: false,
        }
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                // Seconds until one full token is available
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            sleep(wait).await;
        }
    }
}
