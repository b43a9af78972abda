//! Dual-window rate limiter guarding calls to the model provider.
//!
//! Tracks two independent budgets per logical key (`chat`, `embedding`):
//! a request count per rolling minute and a cost-weighted volume per
//! rolling minute (e.g. estimated tokens). Both are token buckets with
//! continuous refill, so capacity regenerates smoothly instead of
//! resetting at window boundaries.
//!
//! [`DualRateLimiter::acquire`] blocks the calling worker until both
//! buckets can satisfy the request. There is no release step: buckets
//! refill on their own. [`DualRateLimiter::acquire_timeout`] bounds the
//! wait for callers (and tests) that cannot block indefinitely.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl Bucket {
    fn new(per_minute: f64) -> Self {
        Self {
            capacity: per_minute,
            tokens: per_minute,
            refill_per_sec: per_minute / 60.0,
            last: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now;
    }

    /// Time until `cost` tokens are available, assuming no other taker.
    fn wait_for(&self, cost: f64) -> Duration {
        if self.tokens >= cost {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((cost - self.tokens) / self.refill_per_sec)
        }
    }

    fn take(&mut self, cost: f64) {
        self.tokens -= cost;
    }
}

struct KeyBuckets {
    requests: Bucket,
    // None when the cost window is unlimited.
    cost: Option<Bucket>,
}

pub struct DualRateLimiter {
    requests_per_min: u32,
    cost_per_min: u64,
    keys: Mutex<HashMap<String, KeyBuckets>>,
}

impl DualRateLimiter {
    /// `cost_per_min == 0` disables the cost window for every key.
    pub fn new(requests_per_min: u32, cost_per_min: u64) -> Self {
        Self {
            requests_per_min,
            cost_per_min,
            keys: Mutex::new(HashMap::new()),
        }
    }

    fn new_buckets(&self) -> KeyBuckets {
        KeyBuckets {
            requests: Bucket::new(f64::from(self.requests_per_min)),
            cost: if self.cost_per_min == 0 {
                None
            } else {
                Some(Bucket::new(self.cost_per_min as f64))
            },
        }
    }

    /// Block until one request slot and `cost` cost units are available
    /// under `key`, then consume both.
    pub async fn acquire(&self, key: &str, cost: u32) {
        // A cost larger than the whole window can never be satisfied;
        // charge the full window instead so the caller stays live.
        let cost = if self.cost_per_min == 0 {
            0.0
        } else {
            f64::from(cost).min(self.cost_per_min as f64)
        };

        loop {
            let wait = {
                let mut keys = self.keys.lock().await;
                let entry = keys
                    .entry(key.to_string())
                    .or_insert_with(|| self.new_buckets());

                let now = Instant::now();
                entry.requests.refill(now);
                if let Some(bucket) = entry.cost.as_mut() {
                    bucket.refill(now);
                }

                let request_wait = entry.requests.wait_for(1.0);
                let cost_wait = entry
                    .cost
                    .as_ref()
                    .map(|bucket| bucket.wait_for(cost))
                    .unwrap_or(Duration::ZERO);
                let wait = request_wait.max(cost_wait);

                if wait.is_zero() {
                    entry.requests.take(1.0);
                    if let Some(bucket) = entry.cost.as_mut() {
                        bucket.take(cost);
                    }
                    return;
                }
                wait
            };

            // Capacity was short; sleep until the slower bucket should have
            // refilled and re-check (another caller may have raced us).
            tokio::time::sleep(wait).await;
        }
    }

    /// [`acquire`](Self::acquire) with a bounded wait.
    pub async fn acquire_timeout(&self, key: &str, cost: u32, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.acquire(key, cost))
            .await
            .map_err(|_| anyhow::anyhow!("rate limiter wait for '{}' exceeded {:?}", key, timeout))
    }

    /// Acquire, run `task`, and return its output. Buckets refill on their
    /// own, so there is nothing to release afterwards.
    pub async fn execute<T, F, Fut>(&self, key: &str, cost: u32, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire(key, cost).await;
        task().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn test_exactly_limit_requests_pass() {
        let limiter = DualRateLimiter::new(3, 0);
        for _ in 0..3 {
            limiter
                .acquire_timeout("chat", 1, TINY)
                .await
                .expect("within budget");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_over_limit_blocks_until_refill() {
        let limiter = DualRateLimiter::new(3, 0);
        for _ in 0..3 {
            limiter.acquire("chat", 1).await;
        }

        // The fourth call must not succeed inside a short wait.
        assert!(limiter.acquire_timeout("chat", 1, TINY).await.is_err());

        // 3 rpm refills one request every 20 seconds.
        let start = Instant::now();
        limiter.acquire("chat", 1).await;
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_secs(19),
            "unblocked too early: {:?}",
            waited
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_do_not_interfere() {
        let limiter = DualRateLimiter::new(2, 0);
        limiter.acquire("chat", 1).await;
        limiter.acquire("chat", 1).await;
        assert!(limiter.acquire_timeout("chat", 1, TINY).await.is_err());

        // A different key has its own untouched buckets.
        limiter
            .acquire_timeout("embedding", 1, TINY)
            .await
            .expect("independent key");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cost_window_limits_independently() {
        // Plenty of request budget, 120 cost units per minute.
        let limiter = DualRateLimiter::new(1000, 120);
        limiter.acquire("embedding", 120).await;

        assert!(limiter.acquire_timeout("embedding", 1, TINY).await.is_err());

        // 120 per minute refills 2 units per second.
        let start = Instant::now();
        limiter.acquire("embedding", 2).await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_cost_is_clamped_to_window() {
        let limiter = DualRateLimiter::new(1000, 100);
        // Larger than the window: charged as a full window, not blocked forever.
        limiter
            .acquire_timeout("embedding", 10_000, Duration::from_secs(120))
            .await
            .expect("clamped cost must eventually pass");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_returns_task_output() {
        let limiter = DualRateLimiter::new(10, 0);
        let out = limiter.execute("chat", 1, || async { 41 + 1 }).await;
        assert_eq!(out, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_share_budget() {
        use std::sync::Arc;

        let limiter = Arc::new(DualRateLimiter::new(6, 0));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire("chat", 1).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // Budget is spent exactly once per caller.
        assert!(limiter.acquire_timeout("chat", 1, TINY).await.is_err());
    }
}
