//! Circuit breaker manager
//!
//! One breaker per activity target. Closed accumulates counts over a
//! rolling interval and trips on the configured failure rate; Open
//! rejects everything until the timeout; HalfOpen admits a bounded
//! number of concurrent probes and closes only after that many
//! consecutive successes. Every transition happens under one mutex,
//! and a generation counter discards observations that raced a
//! transition.

use crate::config::BreakerConfig;
use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BreakerError {
    /// All requests rejected while open
    #[error("circuit breaker is open")]
    Open,

    /// Half-open probe budget exhausted
    #[error("too many requests in half-open state")]
    TooManyRequests,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// Rolling request counts within one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests += 1;
    }

    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }
}

struct Inner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    /// Closed: when the rolling interval ends. Open: when to probe.
    expiry: Option<Instant>,
}

/// A single named breaker
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let interval = Duration::from_secs(config.interval_secs);
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: Some(Instant::now() + interval),
            }),
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.config.trip_min_requests
            && (counts.total_failures as f64) / (counts.requests as f64)
                >= self.config.trip_failure_rate
    }

    fn new_generation(&self, inner: &mut Inner, state: BreakerState, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.state = state;
        inner.expiry = match state {
            BreakerState::Closed => Some(now + Duration::from_secs(self.config.interval_secs)),
            BreakerState::Open => Some(now + Duration::from_secs(self.config.timeout_secs)),
            BreakerState::HalfOpen => None,
        };
    }

    /// Advance expired Closed intervals and Open timeouts
    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if inner.expiry.is_some_and(|at| at <= now) {
                    self.new_generation(inner, BreakerState::Closed, now);
                }
            }
            BreakerState::Open => {
                if inner.expiry.is_some_and(|at| at <= now) {
                    self.new_generation(inner, BreakerState::HalfOpen, now);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().unwrap().counts
    }

    fn before_request(&self) -> Result<u64, BreakerError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        match inner.state {
            BreakerState::Open => Err(BreakerError::Open),
            BreakerState::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                Err(BreakerError::TooManyRequests)
            }
            _ => {
                inner.counts.on_request();
                Ok(inner.generation)
            }
        }
    }

    fn after_request(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        // The breaker changed generation while the call was in flight;
        // its outcome belongs to a window that no longer exists
        if inner.generation != generation {
            return;
        }
        if success {
            inner.counts.on_success();
            if inner.state == BreakerState::HalfOpen
                && inner.counts.consecutive_successes >= self.config.max_requests
            {
                self.new_generation(&mut inner, BreakerState::Closed, now);
            }
        } else {
            inner.counts.on_failure();
            match inner.state {
                BreakerState::Closed if self.ready_to_trip(&inner.counts) => {
                    self.new_generation(&mut inner, BreakerState::Open, now);
                }
                BreakerState::HalfOpen => {
                    self.new_generation(&mut inner, BreakerState::Open, now);
                }
                _ => {}
            }
        }
    }

    /// Run the guarded future, counting its outcome. A panic inside is
    /// counted as a failure and then resumed.
    pub async fn execute<T, E, F>(&self, fut: F) -> Result<Result<T, E>, BreakerError>
    where
        F: Future<Output = Result<T, E>>,
    {
        let generation = self.before_request()?;
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => {
                self.after_request(generation, result.is_ok());
                Ok(result)
            }
            Err(panic) => {
                self.after_request(generation, false);
                std::panic::resume_unwind(panic);
            }
        }
    }
}

/// Name → breaker map, creating breakers on demand
pub struct BreakerManager {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerManager {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }

    /// Peek without creating
    pub fn state(&self, name: &str) -> Option<BreakerState> {
        self.breakers.get(name).map(|b| b.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            interval_secs: 60,
            timeout_secs: 1,
            max_requests: 2,
            trip_min_requests: 4,
            trip_failure_rate: 0.5,
        }
    }

    async fn fail(b: &CircuitBreaker) {
        let _ = b.execute(async { Err::<(), &str>("boom") }).await;
    }

    async fn succeed(b: &CircuitBreaker) {
        let _ = b.execute(async { Ok::<(), &str>(()) }).await;
    }

    #[tokio::test]
    async fn test_trips_on_failure_rate() {
        let b = CircuitBreaker::new(fast_config());
        succeed(&b).await;
        succeed(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
        fail(&b).await; // 4 requests, 50% failures
        assert_eq!(b.state(), BreakerState::Open);

        let rejected = b.execute(async { Ok::<(), &str>(()) }).await;
        assert_eq!(rejected.unwrap_err(), BreakerError::Open);
    }

    #[tokio::test]
    async fn test_does_not_trip_below_min_requests() {
        let b = CircuitBreaker::new(fast_config());
        fail(&b).await;
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_consecutive_successes() {
        let b = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        // Timeout elapsed: probes admitted
        assert_eq!(b.state(), BreakerState::HalfOpen);
        succeed(&b).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);
        succeed(&b).await; // max_requests consecutive successes
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let b = CircuitBreaker::new(fast_config());
        for _ in 0..4 {
            fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_half_open_probe_budget() {
        let b = Arc::new(CircuitBreaker::new(fast_config()));
        for _ in 0..4 {
            fail(&b).await;
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Hold max_requests probes open, then the next is rejected
        let (tx, rx1) = tokio::sync::oneshot::channel::<()>();
        let (tx2, rx2) = tokio::sync::oneshot::channel::<()>();
        let b1 = b.clone();
        let probe1 = tokio::spawn(async move {
            b1.execute(async {
                let _ = rx1.await;
                Ok::<(), &str>(())
            })
            .await
        });
        let b2 = b.clone();
        let probe2 = tokio::spawn(async move {
            b2.execute(async {
                let _ = rx2.await;
                Ok::<(), &str>(())
            })
            .await
        });
        tokio::task::yield_now().await;

        let overflow = b.execute(async { Ok::<(), &str>(()) }).await;
        assert_eq!(overflow.unwrap_err(), BreakerError::TooManyRequests);

        tx.send(()).unwrap();
        tx2.send(()).unwrap();
        probe1.await.unwrap().unwrap().unwrap();
        probe2.await.unwrap().unwrap().unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_panic_counts_as_failure() {
        let b = Arc::new(CircuitBreaker::new(fast_config()));
        for _ in 0..4 {
            let b = b.clone();
            let handle = tokio::spawn(async move {
                b.execute::<(), &str, _>(async { panic!("injected") }).await
            });
            assert!(handle.await.is_err()); // panic propagated
        }
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_manager_creates_on_demand() {
        let mgr = BreakerManager::new(fast_config());
        assert!(mgr.state("activity:1").is_none());
        let b = mgr.get("activity:1");
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(mgr.state("activity:1"), Some(BreakerState::Closed));
        // Same instance handed back
        assert!(Arc::ptr_eq(&b, &mgr.get("activity:1")));
    }
}
