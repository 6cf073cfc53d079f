//! Token bucket shared by every upload on a client.
//!
//! Rate is bytes per second; the burst equals the rate. Waiters are served
//! in arrival order: each takes its reservation under the lock (possibly
//! going into debt) and sleeps off the deficit outside it.

use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{DriveError, DriveResult};

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `rate` must be non-zero; callers treat 0 as "no limiter".
    pub fn new(rate: u64) -> Self {
        let rate = rate.max(1) as f64;
        Self {
            rate,
            burst: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last: Instant::now(),
            }),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    /// Take `n` tokens, waiting as long as needed. Returns a cancellation
    /// error (and gives the reservation back) if `cancel` fires first.
    pub async fn acquire(&self, n: u64, cancel: &CancellationToken) -> DriveResult<()> {
        if n == 0 {
            return Ok(());
        }
        let wait = {
            let mut s = self.state.lock().await;
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(s.last).as_secs_f64();
            s.tokens = (s.tokens + elapsed * self.rate).min(self.burst);
            s.last = now;
            s.tokens -= n as f64;
            if s.tokens >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-s.tokens / self.rate)
            }
        };
        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                let mut s = self.state.lock().await;
                s.tokens = (s.tokens + n as f64).min(self.burst);
                debug!("Rate-limited read cancelled while waiting {:?}", wait);
                Err(DriveError::cancelled("upload cancelled while rate limited"))
            }
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn burst_is_free_then_waits() {
        let bucket = TokenBucket::new(100);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        bucket.acquire(100, &cancel).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        bucket.acquire(50, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_tracks_rate() {
        let bucket = TokenBucket::new(1000);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..10 {
            bucket.acquire(500, &cancel).await.unwrap();
        }
        // 5000 bytes, 1000 free up front, 4000 at 1000 B/s.
        let secs = start.elapsed().as_secs_f64();
        assert!((3.9..4.2).contains(&secs), "took {secs}s");
    }

    #[tokio::test(start_paused = true)]
    async fn read_larger_than_burst_goes_into_debt() {
        let bucket = TokenBucket::new(10);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        bucket.acquire(30, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting() {
        let bucket = Arc::new(TokenBucket::new(10));
        let cancel = CancellationToken::new();
        bucket.acquire(10, &cancel).await.unwrap();

        let b = Arc::clone(&bucket);
        let c = cancel.clone();
        let waiter = tokio::spawn(async move { b.acquire(100, &c).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());

        // Reservation returned: after a full refill the next small read is free.
        tokio::time::sleep(Duration::from_secs(20)).await;
        let start = Instant::now();
        bucket.acquire(5, &CancellationToken::new()).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_bytes_never_waits() {
        let bucket = TokenBucket::new(1);
        tokio_test::assert_ok!(bucket.acquire(0, &CancellationToken::new()).await);
    }
}
