//! Activity repository
//!
//! `ActivityStore` is the durable-side port the engine, worker and
//! reconciler talk to. `PgActivityRepository` is the production
//! implementation; `MemoryActivityStore` backs the scenario tests and
//! single-process runs.

use super::models::{Activity, ActivityStatus, PrewarmStatus};
use crate::core_types::{ActivityId, Quantity};
use crate::db::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Mutex;

/// One stock_logs row
#[derive(Debug, Clone)]
pub struct StockLogEntry {
    pub activity_id: ActivityId,
    pub kind: String,
    pub delta: i64,
    pub note: String,
}

/// Durable activity port
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Activity by id (goods join already resolved into `unit_price`)
    async fn find(&self, activity_id: ActivityId) -> Result<Option<Activity>, RepoError>;

    /// All activities currently in Running status
    async fn list_active(&self) -> Result<Vec<Activity>, RepoError>;

    /// Admin repair path: overwrite sold_count from observed hot state
    async fn set_sold_count(&self, activity_id: ActivityId, value: Quantity)
    -> Result<(), RepoError>;

    async fn mark_prewarmed(&self, activity_id: ActivityId) -> Result<(), RepoError>;

    /// Audit trail for repairs and syncs; loss here never blocks the
    /// operation being logged
    async fn record_stock_log(&self, entry: StockLogEntry) -> Result<(), RepoError>;
}

// ============================================================
// PostgreSQL implementation
// ============================================================

pub struct PgActivityRepository {
    pool: PgPool,
}

impl PgActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Activity, RepoError> {
        let status_id: i16 = row.get("status");
        let prewarm_id: i16 = row.get("prewarm_status");
        let whitelist: serde_json::Value = row.get("gray_whitelist");
        let gray_whitelist = serde_json::from_value(whitelist)
            .map_err(|e| RepoError::Conflict(format!("corrupt gray_whitelist: {}", e)))?;
        Ok(Activity {
            id: row.get("id"),
            goods_id: row.get("goods_id"),
            unit_price: row.get("unit_price"),
            total_stock: row.get("total_stock"),
            sold_count: row.get("sold_count"),
            start_at: row.get::<DateTime<Utc>, _>("start_at"),
            end_at: row.get::<DateTime<Utc>, _>("end_at"),
            limit_per_user: row.get("limit_per_user"),
            status: ActivityStatus::from_id(status_id)
                .ok_or_else(|| RepoError::Conflict(format!("unknown status {}", status_id)))?,
            gray_ratio: row.get("gray_ratio"),
            gray_whitelist,
            prewarm_status: PrewarmStatus::from_id(prewarm_id).unwrap_or(PrewarmStatus::Cold),
        })
    }
}

const ACTIVITY_COLUMNS: &str = "id, goods_id, unit_price, total_stock, sold_count, start_at, \
     end_at, limit_per_user, status, gray_ratio, gray_whitelist, prewarm_status";

#[async_trait]
impl ActivityStore for PgActivityRepository {
    async fn find(&self, activity_id: ActivityId) -> Result<Option<Activity>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM seckill_activities WHERE id = $1",
            ACTIVITY_COLUMNS
        ))
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Activity>, RepoError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM seckill_activities WHERE status = $1",
            ACTIVITY_COLUMNS
        ))
        .bind(ActivityStatus::Running.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn set_sold_count(
        &self,
        activity_id: ActivityId,
        value: Quantity,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            "UPDATE seckill_activities SET sold_count = $2 \
             WHERE id = $1 AND $2 >= 0 AND $2 <= total_stock",
        )
        .bind(activity_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::Conflict(format!(
                "sold_count {} rejected for activity {}",
                value, activity_id
            )));
        }
        Ok(())
    }

    async fn mark_prewarmed(&self, activity_id: ActivityId) -> Result<(), RepoError> {
        sqlx::query("UPDATE seckill_activities SET prewarm_status = $2 WHERE id = $1")
            .bind(activity_id)
            .bind(PrewarmStatus::Warmed.id())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_stock_log(&self, entry: StockLogEntry) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO stock_logs (activity_id, kind, delta, note) VALUES ($1, $2, $3, $4)",
        )
        .bind(entry.activity_id)
        .bind(&entry.kind)
        .bind(entry.delta)
        .bind(&entry.note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ============================================================
// In-memory implementation
// ============================================================

/// In-process activity store for tests and local runs
#[derive(Default)]
pub struct MemoryActivityStore {
    activities: Mutex<rustc_hash::FxHashMap<ActivityId, Activity>>,
    stock_logs: Mutex<Vec<StockLogEntry>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, activity: Activity) {
        self.activities.lock().unwrap().insert(activity.id, activity);
    }

    /// Guarded sold_count bump used by the order store's transaction
    pub(crate) fn try_increment_sold(
        &self,
        activity_id: ActivityId,
        quantity: Quantity,
    ) -> Result<(), RepoError> {
        let mut activities = self.activities.lock().unwrap();
        let activity = activities
            .get_mut(&activity_id)
            .ok_or_else(|| RepoError::NotFound(format!("activity {}", activity_id)))?;
        if activity.sold_count + quantity > activity.total_stock {
            return Err(RepoError::Conflict(format!(
                "sold_count guard for activity {}",
                activity_id
            )));
        }
        activity.sold_count += quantity;
        Ok(())
    }

    /// Cancellation counterpart of the guard, floored at zero
    pub(crate) fn decrement_sold(&self, activity_id: ActivityId, quantity: Quantity) {
        if let Some(activity) = self.activities.lock().unwrap().get_mut(&activity_id) {
            activity.sold_count = (activity.sold_count - quantity).max(0);
        }
    }

    pub fn stock_log_count(&self) -> usize {
        self.stock_logs.lock().unwrap().len()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn find(&self, activity_id: ActivityId) -> Result<Option<Activity>, RepoError> {
        Ok(self.activities.lock().unwrap().get(&activity_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Activity>, RepoError> {
        Ok(self
            .activities
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.status == ActivityStatus::Running)
            .cloned()
            .collect())
    }

    async fn set_sold_count(
        &self,
        activity_id: ActivityId,
        value: Quantity,
    ) -> Result<(), RepoError> {
        let mut activities = self.activities.lock().unwrap();
        let activity = activities
            .get_mut(&activity_id)
            .ok_or_else(|| RepoError::NotFound(format!("activity {}", activity_id)))?;
        if value < 0 || value > activity.total_stock {
            return Err(RepoError::Conflict(format!(
                "sold_count {} rejected for activity {}",
                value, activity_id
            )));
        }
        activity.sold_count = value;
        Ok(())
    }

    async fn mark_prewarmed(&self, activity_id: ActivityId) -> Result<(), RepoError> {
        if let Some(activity) = self.activities.lock().unwrap().get_mut(&activity_id) {
            activity.prewarm_status = PrewarmStatus::Warmed;
        }
        Ok(())
    }

    async fn record_stock_log(&self, entry: StockLogEntry) -> Result<(), RepoError> {
        self.stock_logs.lock().unwrap().push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn activity(id: ActivityId) -> Activity {
        let now = Utc::now();
        Activity {
            id,
            goods_id: 10,
            unit_price: 9900,
            total_stock: 5,
            sold_count: 0,
            start_at: now - Duration::minutes(5),
            end_at: now + Duration::minutes(55),
            limit_per_user: 1,
            status: ActivityStatus::Running,
            gray_ratio: 0.0,
            gray_whitelist: Vec::new(),
            prewarm_status: PrewarmStatus::Cold,
        }
    }

    #[tokio::test]
    async fn test_memory_find_and_list() {
        let store = MemoryActivityStore::new();
        store.insert(activity(1));
        let mut paused = activity(2);
        paused.status = ActivityStatus::Paused;
        store.insert(paused);

        assert!(store.find(1).await.unwrap().is_some());
        assert!(store.find(99).await.unwrap().is_none());
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, 1);
    }

    #[tokio::test]
    async fn test_sold_count_guard() {
        let store = MemoryActivityStore::new();
        store.insert(activity(1));

        for _ in 0..5 {
            store.try_increment_sold(1, 1).unwrap();
        }
        // Sixth unit exceeds total_stock
        assert!(store.try_increment_sold(1, 1).is_err());
        assert_eq!(store.find(1).await.unwrap().unwrap().sold_count, 5);
    }

    #[tokio::test]
    async fn test_set_sold_count_bounds() {
        let store = MemoryActivityStore::new();
        store.insert(activity(1));
        store.set_sold_count(1, 3).await.unwrap();
        assert!(store.set_sold_count(1, 6).await.is_err());
        assert!(store.set_sold_count(1, -1).await.is_err());
    }
}
