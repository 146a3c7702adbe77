use parking_lot::{Mutex, RwLock};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ConfigHandle;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

/// Upper bound on bucket capacity regardless of the configured frame rate.
pub const BUCKET_SAFETY_CEILING: u32 = 1000;

// -----------------------------------------------------------------------------
// ----- TokenBucket -----------------------------------------------------------

/// Capped pool of permits refilled continuously at `refill_rate` per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill_at: Instant,
}

impl TokenBucket {
    /// New buckets start full.
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity.min(BUCKET_SAFETY_CEILING));
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            tokens: capacity,
            last_refill_at: now,
        }
    }

    pub fn try_consume(&mut self, cost: u32, now: Instant) -> bool {
        self.refill(now);

        let cost = f64::from(cost);
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = f64::from(capacity.min(BUCKET_SAFETY_CEILING));
        self.tokens = self.tokens.min(self.capacity);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill_at);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill_at = now;
    }
}

// -----------------------------------------------------------------------------
// ----- RateLimiter -----------------------------------------------------------

/// Per-client frame-rate admission.
///
/// The map lock is only held to find or insert a bucket; each bucket has its
/// own lock, so different clients never wait on each other.
#[derive(Debug)]
pub struct RateLimiter {
    config: ConfigHandle,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Static ---------------------------------------------------

impl RateLimiter {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Public ---------------------------------------------------

impl RateLimiter {
    /// Take `cost` tokens from the client's bucket. `Ok(false)` is a rejection;
    /// a zero cost is a caller bug and never admitted.
    pub fn consume(&self, client_id: &str, cost: u32) -> Result<bool, RateLimitError> {
        self.consume_at(client_id, cost, Instant::now())
    }

    /// Change the capacity of an existing bucket. Returns false for clients
    /// that have no bucket yet.
    pub fn update_capacity(&self, client_id: &str, new_capacity: u32) -> bool {
        let Some(bucket) = self.buckets.read().get(client_id).cloned() else {
            return false;
        };

        bucket.lock().set_capacity(new_capacity);
        debug!(client_id, new_capacity, "bucket capacity updated");
        true
    }

    pub fn tokens(&self, client_id: &str) -> Option<f64> {
        let bucket = self.buckets.read().get(client_id).cloned()?;
        let tokens = bucket.lock().tokens();
        Some(tokens)
    }

    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -----------------------------------------------------------------------------
// ----- RateLimiter: Private --------------------------------------------------

impl RateLimiter {
    fn consume_at(&self, client_id: &str, cost: u32, now: Instant) -> Result<bool, RateLimitError> {
        if cost == 0 {
            return Err(RateLimitError::ZeroCost {
                client_id: client_id.to_string(),
            });
        }

        let bucket = self.bucket(client_id, now);
        let admitted = bucket.lock().try_consume(cost, now);
        Ok(admitted)
    }

    fn bucket(&self, client_id: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.buckets.read().get(client_id) {
            return bucket.clone();
        }

        let mut buckets = self.buckets.write();
        buckets
            .entry(client_id.to_string())
            .or_insert_with(|| {
                let max_fps = self.config.snapshot().max_fps;
                Arc::new(Mutex::new(TokenBucket::new(max_fps, f64::from(max_fps), now)))
            })
            .clone()
    }
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("zero-cost consume for client '{client_id}'")]
    ZeroCost { client_id: String },
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(max_fps: u32) -> RateLimiter {
        let config = ConfigHandle::default();
        config.update(|l| l.max_fps = max_fps);
        RateLimiter::new(config)
    }

    #[test]
    fn sustained_rate_at_refill_is_always_admitted() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(30, 30.0, start);
        let step = Duration::from_secs(1) / 30;

        for i in 0..3_000u32 {
            let now = start + step * i;
            assert!(bucket.try_consume(1, now), "call {i} rejected");
            assert!(bucket.tokens() >= 0.0 && bucket.tokens() <= bucket.capacity());
        }
    }

    #[test]
    fn burst_exhausts_then_refills_after_a_second() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(5, 1.0, start);

        for _ in 0..5 {
            assert!(bucket.try_consume(1, start));
        }
        assert!(!bucket.try_consume(1, start));

        assert!(!bucket.try_consume(1, start + Duration::from_millis(999)));
        assert!(bucket.try_consume(1, start + Duration::from_millis(1000)));
    }

    #[test]
    fn tokens_stay_within_bounds() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(4, 2.0, start);

        // long idle never overfills
        bucket.try_consume(1, start + Duration::from_secs(3600));
        assert!(bucket.tokens() <= bucket.capacity());

        // rejected calls never push tokens negative
        let now = start + Duration::from_secs(3600);
        for _ in 0..20 {
            bucket.try_consume(3, now);
            assert!(bucket.tokens() >= 0.0);
        }
    }

    #[test]
    fn zero_cost_is_an_error() {
        let limiter = limiter(30);
        let err = limiter.consume("cam-1", 0).unwrap_err();
        assert_eq!(
            err,
            RateLimitError::ZeroCost {
                client_id: "cam-1".into()
            }
        );
        assert!(limiter.is_empty());
    }

    #[test]
    fn buckets_take_limits_from_config_at_creation() {
        let config = ConfigHandle::default();
        config.update(|l| l.max_fps = 2);
        let limiter = RateLimiter::new(config.clone());
        let now = Instant::now();

        assert!(limiter.consume_at("a", 1, now).unwrap());
        assert!(limiter.consume_at("a", 1, now).unwrap());
        assert!(!limiter.consume_at("a", 1, now).unwrap());

        // existing buckets keep their limits, new ones pick up the change
        config.update(|l| l.max_fps = 10);
        assert!(!limiter.consume_at("a", 1, now).unwrap());
        for _ in 0..10 {
            assert!(limiter.consume_at("b", 1, now).unwrap());
        }
        assert!(!limiter.consume_at("b", 1, now).unwrap());
    }

    #[test]
    fn update_capacity_clamps_tokens() {
        let limiter = limiter(30);
        assert!(!limiter.update_capacity("ghost", 5));

        limiter.consume("cam", 1).unwrap();
        assert!(limiter.update_capacity("cam", 5));
        assert!(limiter.tokens("cam").unwrap() <= 5.0);
    }

    #[test]
    fn capacity_is_capped_by_safety_ceiling() {
        let bucket = TokenBucket::new(50_000, 50_000.0, Instant::now());
        assert_eq!(bucket.capacity(), f64::from(BUCKET_SAFETY_CEILING));
        assert_eq!(bucket.tokens(), f64::from(BUCKET_SAFETY_CEILING));
    }

    #[test]
    fn clients_are_limited_independently() {
        let limiter = Arc::new(limiter(50));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let limiter = limiter.clone();
                std::thread::spawn(move || {
                    let id = format!("client-{i}");
                    (0..50).filter(|_| limiter.consume(&id, 1).unwrap()).count()
                })
            })
            .collect();

        for h in handles {
            // each client has its own full bucket of 50
            assert!(h.join().unwrap() >= 50);
        }
        assert_eq!(limiter.len(), 4);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
