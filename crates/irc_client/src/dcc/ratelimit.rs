//! Hand-rolled token-bucket bandwidth pacing for DCC transfers (§4.10,
//! Glossary "Token bucket"). A single-transfer cap has no business pulling
//! in an external rate-limiting crate.

use tokio::time::{Duration, Instant};

/// Paces a transfer to at most `rate_bytes_per_sec` bytes/sec, refilling
/// continuously and allowing a short burst up to one second's worth of
/// tokens. A rate of `0` means unlimited and is represented by `None` at
/// the call site rather than by this type.
pub struct TokenBucket {
    rate_bytes_per_sec: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_bytes_per_sec: u64) -> Self {
        let rate = rate_bytes_per_sec as f64;
        TokenBucket {
            rate_bytes_per_sec: rate,
            capacity: rate.max(1.0),
            tokens: rate.max(1.0),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_bytes_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Block until `n` bytes' worth of tokens are available, then consume them.
    pub async fn acquire(&mut self, n: usize) {
        let mut remaining = n as f64;
        loop {
            self.refill();
            if self.tokens >= remaining {
                self.tokens -= remaining;
                return;
            }
            remaining -= self.tokens;
            self.tokens = 0.0;
            let wait_secs = remaining / self.rate_bytes_per_sec;
            tokio::time::sleep(Duration::from_secs_f64(wait_secs.min(1.0).max(0.001))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_returns_immediately_within_burst_capacity() {
        let mut bucket = TokenBucket::new(1_000_000);
        let start = Instant::now();
        bucket.acquire(1024).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn acquire_paces_requests_beyond_capacity() {
        let mut bucket = TokenBucket::new(100);
        bucket.acquire(100).await; // drains the initial burst
        let start = Instant::now();
        bucket.acquire(50).await;
        assert!(start.elapsed() >= Duration::from_millis(400));
    }
}
