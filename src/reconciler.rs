//! Stock reconciler
//!
//! Periodically compares the hot store's view of an activity
//! (available + reserved) against the durable truth
//! (total_stock − sold_count) and repairs drift from durable. The
//! durable store always wins: hot state is a cache of it, never the
//! other way around.
//!
//! Also exposes the admin reconcile operations behind the stock
//! endpoints: push to hot store, pull back to durable, check, repair.
//! Admin operations and the periodic pass are serialized per activity
//! by the distributed lock so two repairs cannot interleave.

use crate::activity::{ActivityStore, StockLogEntry};
use crate::config::ReconcilerConfig;
use crate::core_types::{ActivityId, Quantity};
use crate::error::SeckillError;
use crate::inventory::{DeductStatus, InventoryManager, keys};
use crate::store::{DistributedLock, HotStore, LockError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Outcome of a consistency check
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub activity_id: ActivityId,
    pub hot_stock: Quantity,
    pub reserved: Quantity,
    pub total_stock: Quantity,
    pub sold_count: Quantity,
    /// total_stock − sold_count, what hot_stock + reserved should be
    pub expected: Quantity,
    pub consistent: bool,
}

pub struct StockReconciler {
    store: Arc<dyn HotStore>,
    inventory: Arc<InventoryManager>,
    activities: Arc<dyn ActivityStore>,
    lock: DistributedLock,
    config: ReconcilerConfig,
    reservation_ttl_secs: u64,
    activity_cache_ttl_secs: u64,
}

impl StockReconciler {
    pub fn new(
        store: Arc<dyn HotStore>,
        inventory: Arc<InventoryManager>,
        activities: Arc<dyn ActivityStore>,
        config: ReconcilerConfig,
        reservation_ttl_secs: u64,
        activity_cache_ttl_secs: u64,
    ) -> Self {
        let lock = DistributedLock::new(store.clone());
        Self {
            store,
            inventory,
            activities,
            lock,
            config,
            reservation_ttl_secs,
            activity_cache_ttl_secs,
        }
    }

    /// Run the reconcile loop until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            interval_secs = self.config.interval_secs,
            "Stock reconciler started"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Stock reconciler stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.reconcile_all().await {
                        error!(error = %e, "Reconcile cycle failed");
                    }
                }
            }
        }
    }

    /// One pass over every running activity; returns how many were
    /// repaired
    pub async fn reconcile_all(&self) -> Result<usize, SeckillError> {
        let active = self
            .activities
            .list_active()
            .await
            .map_err(|e| SeckillError::Database(e.to_string()))?;
        let mut repaired = 0;
        for activity in active {
            match self.reconcile_one(activity.id).await {
                Ok(true) => repaired += 1,
                Ok(false) => {}
                Err(e) => warn!(activity_id = activity.id, error = %e, "Reconcile failed"),
            }
        }
        if repaired > 0 {
            info!(count = repaired, "Activities repaired this pass");
        }
        Ok(repaired)
    }

    /// Check one activity and repair when drifted. Skips silently if
    /// another node holds the reconcile lock.
    async fn reconcile_one(&self, activity_id: ActivityId) -> Result<bool, SeckillError> {
        let token = DistributedLock::new_token();
        let guard = match self
            .lock
            .lock(
                &keys::admin_lock("reconcile", activity_id),
                &token,
                Duration::from_secs(30),
            )
            .await
        {
            Ok(guard) => guard,
            Err(LockError::NotAcquired(_)) => {
                debug!(activity_id, "Reconcile lock contended, skipping");
                return Ok(false);
            }
            Err(e) => return Err(SeckillError::Internal(e.to_string())),
        };

        let result = async {
            let report = self.check_consistency(activity_id).await?;
            if report.consistent {
                return Ok(false);
            }
            warn!(
                activity_id,
                hot_stock = report.hot_stock,
                reserved = report.reserved,
                expected = report.expected,
                "Stock drift detected, repairing from durable"
            );
            self.repair_locked(activity_id, &report).await?;
            Ok(true)
        }
        .await;

        if let Err(e) = self.lock.unlock(&guard).await {
            warn!(activity_id, error = %e, "Reconcile lock release failed");
        }
        result
    }

    /// Compare hot and durable views of one activity
    pub async fn check_consistency(
        &self,
        activity_id: ActivityId,
    ) -> Result<ConsistencyReport, SeckillError> {
        let activity = self
            .activities
            .find(activity_id)
            .await
            .map_err(|e| SeckillError::Database(e.to_string()))?
            .ok_or(SeckillError::ActivityNotFound(activity_id))?;
        let hot_stock = self.inventory.get_hot_stock(activity_id).await?;
        let reserved = self.inventory.get_reserved(activity_id).await?;
        let expected = activity.total_stock - activity.sold_count;
        Ok(ConsistencyReport {
            activity_id,
            hot_stock,
            reserved,
            total_stock: activity.total_stock,
            sold_count: activity.sold_count,
            expected,
            consistent: hot_stock + reserved == expected,
        })
    }

    async fn repair_locked(
        &self,
        activity_id: ActivityId,
        report: &ConsistencyReport,
    ) -> Result<(), SeckillError> {
        // Reserved may only be zeroed when no live Try remains; an
        // in-flight reservation will still Confirm or Cancel against
        // it
        let cutoff = chrono::Utc::now().timestamp_millis() - (self.reservation_ttl_secs as i64) * 1000;
        let live_tries = self
            .inventory
            .outstanding_reservations(activity_id)
            .await?
            .into_iter()
            .filter(|r| r.status == DeductStatus::Try && r.try_at > cutoff)
            .count();

        let target = if live_tries == 0 {
            self.inventory.zero_reserved(activity_id).await?;
            report.expected
        } else {
            debug!(
                activity_id,
                live_tries, "Keeping reserved; repairing available only"
            );
            report.expected - report.reserved
        };
        self.inventory
            .sync_to_hot_store(activity_id, target.max(0))
            .await?;

        let delta = target.max(0) - report.hot_stock;
        if let Err(e) = self
            .activities
            .record_stock_log(StockLogEntry {
                activity_id,
                kind: "repair".to_string(),
                delta,
                note: format!(
                    "hot {} reserved {} expected {}",
                    report.hot_stock, report.reserved, report.expected
                ),
            })
            .await
        {
            warn!(activity_id, error = %e, "Stock log write failed");
        }
        info!(activity_id, delta, "Hot stock repaired from durable");
        Ok(())
    }

    // ========================================================
    // Admin operations behind the /stock endpoints
    // ========================================================

    /// Push durable stock and config into the hot store
    pub async fn sync_to_hot(&self, activity_id: ActivityId) -> Result<(), SeckillError> {
        self.with_admin_lock(activity_id, async {
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
            self.store
                .set_ex(
                    &keys::activity_config(activity_id),
                    &blob,
                    Duration::from_secs(self.activity_cache_ttl_secs),
                )
                .await?;
            self.log_admin(activity_id, "sync_to_hot", activity.available())
                .await;
            Ok(())
        })
        .await
    }

    /// Pull the hot view back into the durable sold_count
    pub async fn sync_to_durable(&self, activity_id: ActivityId) -> Result<(), SeckillError> {
        self.with_admin_lock(activity_id, async {
            let activity = self
                .activities
                .find(activity_id)
                .await
                .map_err(|e| SeckillError::Database(e.to_string()))?
                .ok_or(SeckillError::ActivityNotFound(activity_id))?;
            let hot_stock = self.inventory.get_hot_stock(activity_id).await?;
            let reserved = self.inventory.get_reserved(activity_id).await?;
            let sold = (activity.total_stock - hot_stock - reserved).clamp(0, activity.total_stock);
            self.activities
                .set_sold_count(activity_id, sold)
                .await
                .map_err(|e| SeckillError::Database(e.to_string()))?;
            self.log_admin(activity_id, "sync_to_durable", sold).await;
            Ok(())
        })
        .await
    }

    /// Force a repair regardless of the periodic schedule
    pub async fn repair(&self, activity_id: ActivityId) -> Result<ConsistencyReport, SeckillError> {
        self.with_admin_lock(activity_id, async {
            let report = self.check_consistency(activity_id).await?;
            if !report.consistent {
                self.repair_locked(activity_id, &report).await?;
            }
            self.check_consistency(activity_id).await
        })
        .await
    }

    async fn with_admin_lock<T>(
        &self,
        activity_id: ActivityId,
        fut: impl Future<Output = Result<T, SeckillError>>,
    ) -> Result<T, SeckillError> {
        let token = DistributedLock::new_token();
        let guard = self
            .lock
            .try_lock(
                &keys::admin_lock("reconcile", activity_id),
                &token,
                Duration::from_secs(30),
                3,
                Duration::from_millis(100),
            )
            .await
            .map_err(|e| SeckillError::Internal(e.to_string()))?;
        let result = fut.await;
        if let Err(e) = self.lock.unlock(&guard).await {
            warn!(activity_id, error = %e, "Admin lock release failed");
        }
        result
    }

    async fn log_admin(&self, activity_id: ActivityId, kind: &str, value: Quantity) {
        if let Err(e) = self
            .activities
            .record_stock_log(StockLogEntry {
                activity_id,
                kind: kind.to_string(),
                delta: value,
                note: String::new(),
            })
            .await
        {
            warn!(activity_id, error = %e, "Stock log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityStatus, MemoryActivityStore, PrewarmStatus};
    use crate::bloom::AvailabilityFilter;
    use crate::store::MemoryStore;
    use chrono::Utc;

    struct Setup {
        reconciler: StockReconciler,
        inventory: Arc<InventoryManager>,
        activities: Arc<MemoryActivityStore>,
        store: Arc<dyn HotStore>,
    }

    fn setup(total: i64, sold: i64) -> Setup {
        let store: Arc<dyn HotStore> = Arc::new(MemoryStore::new());
        let filter = Arc::new(AvailabilityFilter::new(1_000, 0.01, 600));
        let inventory = Arc::new(InventoryManager::new(store.clone(), filter, 900, 86_400));
        let activities = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        activities.insert(Activity {
            id: 1,
            goods_id: 10,
            unit_price: 9900,
            total_stock: total,
            sold_count: sold,
            start_at: now - chrono::Duration::minutes(30),
            end_at: now + chrono::Duration::hours(1),
            limit_per_user: 5,
            status: ActivityStatus::Running,
            gray_ratio: 0.0,
            gray_whitelist: Vec::new(),
            prewarm_status: PrewarmStatus::Cold,
        });
        let reconciler = StockReconciler::new(
            store.clone(),
            inventory.clone(),
            activities.clone(),
            ReconcilerConfig::default(),
            900,
            86_400,
        );
        Setup {
            reconciler,
            inventory,
            activities,
            store,
        }
    }

    #[tokio::test]
    async fn test_consistent_state_untouched() {
        let s = setup(10, 4);
        s.inventory.sync_to_hot_store(1, 6).await.unwrap();

        let report = s.reconciler.check_consistency(1).await.unwrap();
        assert!(report.consistent);
        assert_eq!(s.reconciler.reconcile_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drift_detected_and_repaired() {
        let s = setup(10, 4);
        // Manually drifted: expected 6, hot says 3
        s.inventory.sync_to_hot_store(1, 3).await.unwrap();

        let report = s.reconciler.check_consistency(1).await.unwrap();
        assert!(!report.consistent);
        assert_eq!(report.expected, 6);

        let repaired = s.reconciler.reconcile_all().await.unwrap();
        assert_eq!(repaired, 1);
        assert_eq!(s.inventory.get_hot_stock(1).await.unwrap(), 6);
        assert!(s.reconciler.check_consistency(1).await.unwrap().consistent);
        // Repair left an audit row
        assert!(s.activities.stock_log_count() > 0);
    }

    #[tokio::test]
    async fn test_repair_keeps_live_reservations() {
        let s = setup(10, 0);
        s.inventory.sync_to_hot_store(1, 10).await.unwrap();
        // A live Try holds 2 units
        s.inventory.try_deduct(1, 1001, "d1", 2, 5).await.unwrap();
        // Drift the available counter
        s.store
            .set_ex("stock:{1}", "5", Duration::from_secs(3600))
            .await
            .unwrap();

        s.reconciler.repair(1).await.unwrap();
        // Reserved kept (reservation younger than TTL); available
        // repaired to expected − reserved
        assert_eq!(s.inventory.get_reserved(1).await.unwrap(), 2);
        assert_eq!(s.inventory.get_hot_stock(1).await.unwrap(), 8);
        assert!(s.reconciler.check_consistency(1).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_sync_to_durable_back_computes_sold() {
        let s = setup(10, 0);
        s.inventory.sync_to_hot_store(1, 10).await.unwrap();
        s.inventory.try_deduct(1, 1001, "d1", 3, 5).await.unwrap();
        s.inventory.confirm(1, "d1").await.unwrap();
        // Hot: stock 7, reserved 0; durable sold still 0

        s.reconciler.sync_to_durable(1).await.unwrap();
        assert_eq!(s.activities.find(1).await.unwrap().unwrap().sold_count, 3);
    }

    #[tokio::test]
    async fn test_sync_to_hot_pushes_config() {
        let s = setup(10, 4);
        s.reconciler.sync_to_hot(1).await.unwrap();
        assert_eq!(s.inventory.get_hot_stock(1).await.unwrap(), 6);
        assert!(s.store.get("activity:config:1").await.unwrap().is_some());
    }
}
