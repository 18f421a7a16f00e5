//! Token-bucket gate shared by every outbound request
//!
//! The bucket refills lazily: each `acquire` computes how many tokens accrued
//! since the last refill instead of relying on a background timer. Tokens are
//! only deducted inside the critical section that also decides the caller may
//! proceed, so dropping a pending `acquire` never leaks budget.

use crate::error::{ApiError, ApiResult};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Smallest sleep between retries of the bucket, avoids spinning on rounding
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Slack for float accumulation when comparing against whole-token costs
const EPSILON: f64 = 1e-9;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    /// Server-signaled throttle; no refill happens before this instant
    paused_until: Option<Instant>,
}

/// Process-wide request budget
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a full bucket holding `capacity` tokens that refills at
    /// `refill_per_sec` tokens per second
    ///
    /// # Errors
    /// Returns `ApiError::Config` if either parameter is not positive
    pub fn new(capacity: u32, refill_per_sec: f64) -> ApiResult<Self> {
        if capacity == 0 {
            return Err(ApiError::Config(
                "rate limiter capacity must be at least 1".into(),
            ));
        }
        if !refill_per_sec.is_finite() || refill_per_sec <= 0.0 {
            return Err(ApiError::Config(format!(
                "rate limiter refill rate must be positive, got {refill_per_sec}"
            )));
        }

        Ok(Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
                paused_until: None,
            }),
        })
    }

    /// Bucket capacity in tokens
    #[must_use]
    pub fn capacity(&self) -> u32 {
        // capacity was built from a u32
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let capacity = self.capacity as u32;
        capacity
    }

    /// Refill rate in tokens per second
    #[must_use]
    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Tokens available right now
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Wait until `cost` tokens are available, then take them
    ///
    /// Never fails. A cost above capacity is clamped to capacity, otherwise
    /// it could never be satisfied.
    pub async fn acquire(&self, cost: u32) {
        let cost = f64::from(cost).min(self.capacity);
        loop {
            match self.try_take(cost) {
                Ok(()) => return,
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when `cancel` fires
    ///
    /// # Errors
    /// Returns `ApiError::Cancelled` if cancelled before tokens were taken.
    /// In that case the bucket is left untouched.
    pub async fn acquire_or_cancel(&self, cost: u32, cancel: &CancellationToken) -> ApiResult<()> {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ApiError::Cancelled),
            () = self.acquire(cost) => Ok(()),
        }
    }

    /// Record a server-signaled backoff
    ///
    /// Drains the bucket and pushes the next refill epoch `duration` into the
    /// future. Overlapping penalties keep the later deadline. A duration too
    /// large to represent as an instant only drains the bucket.
    pub fn penalize(&self, duration: Duration) {
        let now = Instant::now();
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);
        bucket.tokens = 0.0;

        let Some(until) = now.checked_add(duration) else {
            tracing::warn!(backoff_secs = duration.as_secs(), "ignoring unrepresentable backoff");
            bucket.last_refill = bucket.paused_until.unwrap_or(now);
            return;
        };
        let until = bucket.paused_until.map_or(until, |p| p.max(until));
        bucket.paused_until = Some(until);
        bucket.last_refill = until;
        tracing::warn!(backoff_ms = duration.as_millis(), "rate limiter penalized by server");
    }

    fn try_take(&self, cost: f64) -> Result<(), Duration> {
        let now = Instant::now();
        let mut bucket = self.bucket.lock();
        self.refill(&mut bucket, now);

        if bucket.tokens + EPSILON >= cost {
            bucket.tokens = (bucket.tokens - cost).max(0.0);
            return Ok(());
        }

        let deficit = cost - bucket.tokens;
        let mut wait =
            Duration::try_from_secs_f64(deficit / self.refill_per_sec).unwrap_or(Duration::MAX);
        if let Some(paused_until) = bucket.paused_until {
            wait = wait.saturating_add(paused_until.saturating_duration_since(now));
        }
        Err(wait.max(MIN_WAIT))
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        if let Some(paused_until) = bucket.paused_until {
            if now < paused_until {
                return;
            }
            bucket.paused_until = None;
        }

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_per_sec, bucket.tokens)
            .min(self.capacity);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_rejects_zero_capacity() {
        assert!(RateLimiter::new(0, 1.0).is_err());
        assert!(RateLimiter::new(1, 0.0).is_err());
        assert!(RateLimiter::new(1, f64::NAN).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_capacity_never_blocks() {
        let limiter = RateLimiter::new(10, 1.0).unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire(2).await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocks_until_refill() {
        let limiter = RateLimiter::new(2, 2.0).unwrap();
        let start = Instant::now();
        limiter.acquire(2).await;
        limiter.acquire(1).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "waited {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cost_above_capacity_is_clamped() {
        let limiter = RateLimiter::new(3, 1.0).unwrap();
        let start = Instant::now();
        limiter.acquire(100).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_drains_and_delays_refill() {
        let limiter = RateLimiter::new(5, 10.0).unwrap();
        limiter.penalize(Duration::from_secs(2));
        assert!(limiter.available() < EPSILON);

        let start = Instant::now();
        limiter.acquire(1).await;
        let elapsed = start.elapsed();
        // 2s pause, then 100ms to accrue one token
        assert!(elapsed >= Duration::from_millis(2100), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2200), "waited {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_penalties_keep_later_deadline() {
        let limiter = RateLimiter::new(1, 100.0).unwrap();
        limiter.penalize(Duration::from_secs(5));
        limiter.penalize(Duration::from_secs(1));
        let start = Instant::now();
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_penalty_only_drains() {
        let limiter = RateLimiter::new(2, 10.0).unwrap();
        limiter.penalize(Duration::MAX);
        limiter.penalize(Duration::from_secs(10_000_000_000_000_000_000));
        assert!(limiter.available() < EPSILON);

        let start = Instant::now();
        limiter.acquire(1).await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_acquire_leaves_bucket_intact() {
        let limiter = Arc::new(RateLimiter::new(2, 1.0).unwrap());
        limiter.acquire(2).await;

        let cancel = CancellationToken::new();
        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire_or_cancel(2, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ApiError::Cancelled)));

        // 1.5 tokens accrued and none were taken by the abandoned waiter
        let available = limiter.available();
        assert!((available - 1.5).abs() < 0.01, "available {available}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_returns_immediately() {
        let limiter = RateLimiter::new(1, 1.0).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(limiter.acquire_or_cancel(1, &cancel).await.is_err());
        assert!((limiter.available() - 1.0).abs() < EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_conservation_under_contention() {
        let limiter = Arc::new(RateLimiter::new(5, 10.0).unwrap());
        let taken = Arc::new(AtomicU32::new(0));
        let window = Duration::from_secs(3);
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = Arc::clone(&limiter);
            let taken = Arc::clone(&taken);
            handles.push(tokio::spawn(async move {
                loop {
                    limiter.acquire(1).await;
                    if start.elapsed() > window {
                        return;
                    }
                    taken.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // capacity + ceil(elapsed * rate)
        let ceiling = 5 + 30;
        let consumed = taken.load(Ordering::SeqCst);
        assert!(consumed <= ceiling, "consumed {consumed} > {ceiling}");
        assert!(consumed >= 30, "consumed only {consumed}");
    }
}
