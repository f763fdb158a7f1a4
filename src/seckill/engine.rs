//! Sale transaction engine
//!
//! The ordered admission pipeline. Cheap, local rejections come
//! first (memoized result, parameter check, bloom cutoff, breaker
//! state); everything that can observe a sick backend runs inside the
//! activity's breaker; the TCC Try is the only stock mutation; the
//! queue hand-off is compensated on failure.
//!
//! Memoization uses set-if-absent: the first terminal outcome for a
//! request id wins and every later arrival, concurrent or retried,
//! reads that same blob back.

use super::types::{OrderMessage, SaleRequest, SaleResult};
use crate::activity::{Activity, ActivityStore};
use crate::breaker::{BreakerManager, BreakerState};
use crate::bloom::AvailabilityFilter;
use crate::config::SeckillConfig;
use crate::core_types::ActivityId;
use crate::error::SeckillError;
use crate::inventory::{InventoryManager, TryOutcome, keys};
use crate::limiter::{RateDecision, RateDimension, RateLimiter};
use crate::queue::OrderQueue;
use crate::store::{DistributedLock, HotStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_QUANTITY: i64 = 5;

pub struct SeckillEngine {
    store: Arc<dyn HotStore>,
    inventory: Arc<InventoryManager>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerManager>,
    activities: Arc<dyn ActivityStore>,
    queue: Arc<OrderQueue>,
    lock: DistributedLock,
    config: SeckillConfig,
}

impl SeckillEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn HotStore>,
        inventory: Arc<InventoryManager>,
        limiter: Arc<RateLimiter>,
        breakers: Arc<BreakerManager>,
        activities: Arc<dyn ActivityStore>,
        queue: Arc<OrderQueue>,
        config: SeckillConfig,
    ) -> Self {
        let lock = DistributedLock::new(store.clone());
        Self {
            store,
            inventory,
            limiter,
            breakers,
            activities,
            queue,
            lock,
            config,
        }
    }

    fn breaker_name(activity_id: ActivityId) -> String {
        format!("activity:{}", activity_id)
    }

    /// The single public sale operation
    pub async fn do_sale(&self, req: &SaleRequest) -> SaleResult {
        // 1. Idempotency: a memoized outcome is returned verbatim
        match self.cached_result(req).await {
            Ok(Some(cached)) => return cached,
            Ok(None) => {}
            Err(e) => warn!(request_id = %req.request_id, error = %e, "Result cache read failed"),
        }

        // 2. Parameter validation. An empty request id has no
        //    idempotency key to memoize under; reject outright.
        if req.request_id.is_empty() {
            return SaleResult::failure(&req.request_id, &SeckillError::MissingRequestId);
        }
        if !(1..=MAX_QUANTITY).contains(&req.quantity) {
            let err = SeckillError::InvalidQuantity(req.quantity);
            return self
                .finish(req, Ok(SaleResult::failure(&req.request_id, &err)))
                .await;
        }

        // 3. Bloom / sold-out cutoff: a negative here is authoritative
        if !self.inventory.filter().is_available(req.activity_id) {
            return self
                .finish(req, Ok(SaleResult::failure(&req.request_id, &SeckillError::SoldOut)))
                .await;
        }

        // 4. Breaker gate, then the rest of the pipeline runs inside
        //    the breaker so backend failures are observed
        let name = Self::breaker_name(req.activity_id);
        if self.breakers.state(&name) == Some(BreakerState::Open) {
            return SaleResult::failure(&req.request_id, &SeckillError::BreakerOpen);
        }
        let breaker = self.breakers.get(&name);
        let outcome = breaker.execute(self.admit(req)).await;

        match outcome {
            Err(_) => SaleResult::failure(&req.request_id, &SeckillError::BreakerOpen),
            Ok(result) => self.finish(req, result).await,
        }
    }

    /// Steps 5-12. `Ok` is a terminal business outcome (success or
    /// user-facing rejection); `Err` is a system fault that counts
    /// against the breaker and is never memoized.
    async fn admit(&self, req: &SaleRequest) -> Result<SaleResult, SeckillError> {
        // 5. Multi-dimension rate limit; a store fault here is a
        //    system error, not a denial
        let decision = self
            .limiter
            .allow(&[
                (RateDimension::Global, ""),
                (RateDimension::Activity, &req.activity_id.to_string()),
                (RateDimension::User, &req.user_id.to_string()),
                (RateDimension::Ip, &req.ip),
            ])
            .await?;
        if let RateDecision::Denied(dim) = decision {
            return Ok(SaleResult::failure(
                &req.request_id,
                &SeckillError::RateLimited(dim.as_str()),
            ));
        }

        // 6. Activity gate from the hot snapshot
        let activity = self.load_activity(req.activity_id).await?;
        let Some(activity) = activity else {
            return Ok(SaleResult::failure(
                &req.request_id,
                &SeckillError::ActivityNotFound(req.activity_id),
            ));
        };
        if !activity.is_open(chrono::Utc::now()) {
            return Ok(SaleResult::failure(
                &req.request_id,
                &SeckillError::ActivityNotRunning,
            ));
        }

        // 7. Gray control
        if !activity.admits_gray(req.user_id) {
            return Ok(SaleResult::failure(
                &req.request_id,
                &SeckillError::NotInGrayRange,
            ));
        }

        // 8. Eligibility
        if self.is_blacklisted(req).await? {
            return Ok(SaleResult::failure(
                &req.request_id,
                &SeckillError::NotEligible,
            ));
        }

        // 9. Try-with-limit
        let deduct_id = format!(
            "deduct:{}:{}",
            req.request_id,
            chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or_default()
        );
        let outcome = self
            .inventory
            .try_deduct(
                req.activity_id,
                req.user_id,
                &deduct_id,
                req.quantity,
                activity.limit_per_user,
            )
            .await?;
        match outcome {
            TryOutcome::LimitExceeded => {
                return Ok(SaleResult::failure(
                    &req.request_id,
                    &SeckillError::PurchaseLimitExceeded,
                ));
            }
            TryOutcome::InsufficientStock { current } => {
                return Ok(SaleResult::failure(
                    &req.request_id,
                    &SeckillError::InsufficientStock(current),
                ));
            }
            TryOutcome::Reserved { .. } => {}
        }

        // 10. Queue hand-off; a failed publish must release the
        //     reservation before surfacing
        let message = OrderMessage {
            request_id: req.request_id.clone(),
            activity_id: req.activity_id,
            user_id: req.user_id,
            goods_id: activity.goods_id,
            quantity: req.quantity,
            unit_price: activity.unit_price,
            deduct_id: deduct_id.clone(),
            ts: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(publish_err) = self.queue.publish(&message, req.vip) {
            error!(request_id = %req.request_id, error = %publish_err, "Publish failed, cancelling reservation");
            if let Err(cancel_err) = self.inventory.cancel(req.activity_id, &deduct_id).await {
                error!(
                    request_id = %req.request_id,
                    deduct_id = %deduct_id,
                    error = %cancel_err,
                    "Compensating cancel failed; reservation will expire by TTL"
                );
            }
            return Err(SeckillError::QueuePublish(publish_err.to_string()));
        }

        // 11. Attempt log: loss-tolerant, never blocks
        info!(
            request_id = %req.request_id,
            activity_id = req.activity_id,
            user_id = req.user_id,
            quantity = req.quantity,
            deduct_id = %deduct_id,
            vip = req.vip,
            "Sale admitted"
        );

        // 12. Result; the order id arrives asynchronously
        Ok(SaleResult::processing(&req.request_id))
    }

    /// Memoize terminal outcomes (13) and observe the pipeline's
    /// verdict (14). First writer wins; on a lost race the earlier
    /// blob is returned so all callers of one request id agree.
    async fn finish(
        &self,
        req: &SaleRequest,
        outcome: Result<SaleResult, SeckillError>,
    ) -> SaleResult {
        match outcome {
            Ok(result) => match self.memoize(req, &result).await {
                Ok(Some(earlier)) => earlier,
                Ok(None) => result,
                Err(e) => {
                    warn!(request_id = %req.request_id, error = %e, "Memoization failed");
                    result
                }
            },
            Err(e) => {
                debug!(request_id = %req.request_id, error = %e, "Sale failed with system error");
                SaleResult::failure(&req.request_id, &e)
            }
        }
    }

    async fn cached_result(&self, req: &SaleRequest) -> Result<Option<SaleResult>, SeckillError> {
        let key = keys::sale_result(&req.request_id, req.user_id);
        match self.store.get(&key).await? {
            None => Ok(None),
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
        }
    }

    /// Returns the earlier result when this one lost the write race
    async fn memoize(
        &self,
        req: &SaleRequest,
        result: &SaleResult,
    ) -> Result<Option<SaleResult>, SeckillError> {
        let key = keys::sale_result(&req.request_id, req.user_id);
        let blob = serde_json::to_string(result)?;
        let ttl = Duration::from_secs(self.config.result_ttl_secs);
        if self.store.set_nx_ex(&key, &blob, ttl).await? {
            return Ok(None);
        }
        self.cached_result(req).await
    }

    async fn is_blacklisted(&self, req: &SaleRequest) -> Result<bool, SeckillError> {
        if self
            .store
            .exists(&keys::blacklist_user(req.user_id))
            .await?
        {
            return Ok(true);
        }
        Ok(self
            .store
            .exists(&keys::blacklist_activity_user(req.activity_id, req.user_id))
            .await?)
    }

    /// Activity snapshot: hot first, durable on miss (cached 24h)
    async fn load_activity(
        &self,
        activity_id: ActivityId,
    ) -> Result<Option<Activity>, SeckillError> {
        let key = keys::activity_config(activity_id);
        if let Some(blob) = self.store.get(&key).await? {
            return Ok(Some(serde_json::from_str(&blob)?));
        }
        let Some(activity) = self
            .activities
            .find(activity_id)
            .await
            .map_err(|e| SeckillError::Database(e.to_string()))?
        else {
            return Ok(None);
        };
        let blob = serde_json::to_string(&activity)?;
        let ttl = Duration::from_secs(self.config.activity_cache_ttl_secs);
        self.store.set_ex(&key, &blob, ttl).await?;
        Ok(Some(activity))
    }

    /// Load an activity into the hot store before its window opens.
    /// Idempotent; serialized by a distributed lock because it races
    /// admin reconcile, never the sale path.
    pub async fn prewarm(&self, activity_id: ActivityId) -> Result<(), SeckillError> {
        let token = DistributedLock::new_token();
        let guard = self
            .lock
            .try_lock(
                &keys::admin_lock("prewarm", activity_id),
                &token,
                Duration::from_secs(30),
                self.config.lock_retries,
                Duration::from_millis(self.config.lock_backoff_ms),
            )
            .await
            .map_err(|e| SeckillError::Internal(e.to_string()))?;

        let result = self.prewarm_locked(activity_id).await;

        if let Err(e) = self.lock.unlock(&guard).await {
            warn!(activity_id, error = %e, "Prewarm lock release failed");
        }
        result
    }

    async fn prewarm_locked(&self, activity_id: ActivityId) -> Result<(), SeckillError> {
        let activity = self
            .activities
            .find(activity_id)
            .await
            .map_err(|e| SeckillError::Database(e.to_string()))?
            .ok_or(SeckillError::ActivityNotFound(activity_id))?;

        self.inventory
            .sync_to_hot_store(activity_id, activity.available())
            .await?;

        let blob = serde_json::to_string(&activity)?;
        let ttl = Duration::from_secs(self.config.activity_cache_ttl_secs);
        self.store
            .set_ex(&keys::activity_config(activity_id), &blob, ttl)
            .await?;

        if let Err(e) = self.activities.mark_prewarmed(activity_id).await {
            warn!(activity_id, error = %e, "Failed to persist prewarm status");
        }
        info!(activity_id, stock = activity.available(), "Activity prewarmed");
        Ok(())
    }

    /// Resolve the memoized blob for a request
    pub async fn query_result(
        &self,
        request_id: &str,
        user_id: i64,
    ) -> Result<SaleResult, SeckillError> {
        let key = keys::sale_result(request_id, user_id);
        match self.store.get(&key).await? {
            Some(blob) => Ok(serde_json::from_str(&blob)?),
            None => Err(SeckillError::ResultNotFound),
        }
    }

    pub fn filter(&self) -> &AvailabilityFilter {
        self.inventory.filter()
    }
}
