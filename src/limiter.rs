//! Multi-dimension rate limiter
//!
//! One sliding window per (dimension, key), kept in the hot store so
//! every node sees the same counts. The window script prunes, counts
//! and admits atomically.
//!
//! Failure policy is per dimension: `global` and `activity` protect
//! the system and must fail closed on store errors; `user` and `ip`
//! protect fairness and may fail open when configured to.

use crate::config::RateConfig;
use crate::store::{HotStore, Reply, StoreScript};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const WINDOW_MS: i64 = 60_000;

/// Rate limit dimensions, most to least coarse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateDimension {
    Global,
    Activity,
    Ip,
    User,
}

impl RateDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateDimension::Global => "global",
            RateDimension::Activity => "activity",
            RateDimension::Ip => "ip",
            RateDimension::User => "user",
        }
    }

    /// System-protecting dimensions reject when the store is down
    fn fail_closed(&self) -> bool {
        matches!(self, RateDimension::Global | RateDimension::Activity)
    }
}

impl fmt::Display for RateDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a multi-dimension probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Which dimension denied
    Denied(RateDimension),
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Sliding-window limiter over the hot store
pub struct RateLimiter {
    store: Arc<dyn HotStore>,
    config: RateConfig,
    /// Distinguishes same-millisecond window members
    nonce: AtomicU64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn HotStore>, config: RateConfig) -> Self {
        Self {
            store,
            config,
            nonce: AtomicU64::new(0),
        }
    }

    fn limit_for(&self, dim: RateDimension) -> u64 {
        match dim {
            RateDimension::Global => self.config.global,
            RateDimension::Activity => self.config.activity,
            RateDimension::Ip => self.config.ip,
            RateDimension::User => self.config.user,
        }
    }

    /// Probe every given dimension; the first denial wins.
    ///
    /// The caller passes the dimension set explicitly, e.g.
    /// `[(Global, ""), (Activity, "42"), (User, "1001"), (Ip, addr)]`.
    ///
    /// A store error on a fail-closed dimension propagates as `Err`,
    /// so the caller both rejects the request and observes the
    /// backend fault; fail-open dimensions admit with a warning.
    pub async fn allow(
        &self,
        dimensions: &[(RateDimension, &str)],
    ) -> Result<RateDecision, crate::error::SeckillError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        for &(dim, key) in dimensions {
            let window_key = format!("rate:{}:{}", dim.as_str(), key);
            let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
            let limit = self.limit_for(dim);
            let reply = self
                .store
                .eval(
                    StoreScript::SlidingWindow,
                    &[window_key],
                    &[
                        now_ms.to_string(),
                        WINDOW_MS.to_string(),
                        limit.to_string(),
                        nonce.to_string(),
                    ],
                )
                .await;

            match reply {
                Ok(Reply::Int(1)) => {}
                Ok(_) => return Ok(RateDecision::Denied(dim)),
                Err(e) => {
                    if dim.fail_closed() || !self.config.fail_open_user_dims {
                        tracing::warn!(dimension = dim.as_str(), error = %e, "Rate probe failed, rejecting");
                        return Err(e.into());
                    }
                    tracing::warn!(dimension = dim.as_str(), error = %e, "Rate probe failed, admitting");
                }
            }
        }
        Ok(RateDecision::Allowed)
    }
}
