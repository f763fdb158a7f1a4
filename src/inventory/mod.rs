//! Inventory manager: the Try/Confirm/Cancel reservation protocol
//!
//! All stock movement happens inside the three hot-store scripts, so
//! every invariant (no over-sell, per-user cap, terminal-state
//! idempotency) holds under arbitrary interleavings without any
//! application lock. This module owns every `stock:*`,
//! `deduct_record:*` and `purchase_count:*` key; nothing else writes
//! them.

pub mod keys;
mod record;

pub use record::{DeductRecord, DeductStatus, SettleOutcome, TryOutcome};

use crate::bloom::AvailabilityFilter;
use crate::core_types::{ActivityId, Quantity, UserId};
use crate::error::SeckillError;
use crate::store::{HotStore, Reply, StoreScript, script::status};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hot stock lives a day; prewarm or reconcile refresh it
const STOCK_TTL_SECS: u64 = 24 * 3600;

pub struct InventoryManager {
    store: Arc<dyn HotStore>,
    filter: Arc<AvailabilityFilter>,
    reservation_ttl_secs: u64,
    purchase_ttl_secs: u64,
}

impl InventoryManager {
    pub fn new(
        store: Arc<dyn HotStore>,
        filter: Arc<AvailabilityFilter>,
        reservation_ttl_secs: u64,
        purchase_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            filter,
            reservation_ttl_secs,
            purchase_ttl_secs,
        }
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Try: reserve `quantity` units for `user_id`, enforcing the
    /// per-user cap inside the script. A zero remaining stock marks
    /// the activity sold out locally.
    pub async fn try_deduct(
        &self,
        activity_id: ActivityId,
        user_id: UserId,
        deduct_id: &str,
        quantity: Quantity,
        limit_per_user: Quantity,
    ) -> Result<TryOutcome, SeckillError> {
        let keys = vec![
            keys::stock(activity_id),
            keys::reserved(activity_id),
            keys::deduct_log(activity_id),
            keys::purchase_count(activity_id, user_id),
            keys::deduct_record(activity_id, deduct_id),
        ];
        let args = vec![
            deduct_id.to_string(),
            quantity.to_string(),
            self.reservation_ttl_secs.to_string(),
            limit_per_user.to_string(),
            self.purchase_ttl_secs.to_string(),
            Self::now_ms().to_string(),
        ];

        let reply = self.store.eval(StoreScript::TryDeduct, &keys, &args).await?;
        let outcome = parse_try_reply(&reply)?;

        match outcome {
            TryOutcome::Reserved { remaining } => {
                debug!(
                    activity_id,
                    user_id, deduct_id, quantity, remaining, "Reserved stock"
                );
                if remaining == 0 {
                    info!(activity_id, "Stock exhausted, marking sold out");
                    self.filter.mark_sold_out(activity_id);
                }
            }
            TryOutcome::InsufficientStock { current } if current == 0 => {
                self.filter.mark_sold_out(activity_id);
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Confirm: settle the reservation, leaving stock deducted
    pub async fn confirm(
        &self,
        activity_id: ActivityId,
        deduct_id: &str,
    ) -> Result<SettleOutcome, SeckillError> {
        let keys = vec![
            keys::deduct_record(activity_id, deduct_id),
            keys::reserved(activity_id),
        ];
        let reply = self
            .store
            .eval(
                StoreScript::ConfirmDeduct,
                &keys,
                &[Self::now_ms().to_string()],
            )
            .await?;
        let outcome = parse_settle_reply(&reply, status::ALREADY_CONFIRMED)?;
        if !outcome.is_ok() {
            warn!(activity_id, deduct_id, ?outcome, "Confirm did not settle");
        }
        Ok(outcome)
    }

    /// Cancel: roll the reservation back, restoring stock
    pub async fn cancel(
        &self,
        activity_id: ActivityId,
        deduct_id: &str,
    ) -> Result<SettleOutcome, SeckillError> {
        let keys = vec![
            keys::stock(activity_id),
            keys::reserved(activity_id),
            keys::deduct_record(activity_id, deduct_id),
        ];
        let reply = self
            .store
            .eval(
                StoreScript::CancelDeduct,
                &keys,
                &[Self::now_ms().to_string()],
            )
            .await?;
        let outcome = parse_settle_reply(&reply, status::ALREADY_CANCELLED)?;
        if outcome == SettleOutcome::Settled {
            // Stock came back; the sale can admit again
            self.filter.clear_sold_out(activity_id);
        }
        Ok(outcome)
    }

    /// Push available stock into the hot store (prewarm / repair) and
    /// register the activity with the bloom filter
    pub async fn sync_to_hot_store(
        &self,
        activity_id: ActivityId,
        stock: Quantity,
    ) -> Result<(), SeckillError> {
        self.store
            .eval(
                StoreScript::SyncStock,
                &[keys::stock(activity_id)],
                &[stock.to_string(), STOCK_TTL_SECS.to_string()],
            )
            .await?;
        if stock > 0 {
            self.filter.add(activity_id);
        } else {
            self.filter.mark_sold_out(activity_id);
        }
        info!(activity_id, stock, "Synced stock to hot store");
        Ok(())
    }

    pub async fn get_hot_stock(&self, activity_id: ActivityId) -> Result<Quantity, SeckillError> {
        read_int(self.store.as_ref(), &keys::stock(activity_id)).await
    }

    pub async fn get_reserved(&self, activity_id: ActivityId) -> Result<Quantity, SeckillError> {
        read_int(self.store.as_ref(), &keys::reserved(activity_id)).await
    }

    pub async fn purchase_count(
        &self,
        activity_id: ActivityId,
        user_id: UserId,
    ) -> Result<Quantity, SeckillError> {
        read_int(
            self.store.as_ref(),
            &keys::purchase_count(activity_id, user_id),
        )
        .await
    }

    /// Return already-confirmed units to the available pool. Used when
    /// a settled sale is undone durably (unpaid order expired) and the
    /// reservation is past Cancel. The caller must guarantee exactly
    /// one restock per undone sale.
    pub async fn restock(
        &self,
        activity_id: ActivityId,
        quantity: Quantity,
    ) -> Result<Quantity, SeckillError> {
        let remaining = self
            .store
            .incr_by(&keys::stock(activity_id), quantity)
            .await?;
        if remaining > 0 {
            self.filter.clear_sold_out(activity_id);
        }
        info!(activity_id, quantity, remaining, "Restocked units");
        Ok(remaining)
    }

    /// Reconciler repair path: drop the reserved counter outright.
    /// Only valid once every outstanding reservation has aged past
    /// its TTL.
    pub async fn zero_reserved(&self, activity_id: ActivityId) -> Result<(), SeckillError> {
        self.store.del(&keys::reserved(activity_id)).await?;
        Ok(())
    }

    /// All reservations still visible in the deduct log. Expired
    /// entries vanish with the log's TTL.
    pub async fn outstanding_reservations(
        &self,
        activity_id: ActivityId,
    ) -> Result<Vec<DeductRecord>, SeckillError> {
        let blobs = self
            .store
            .hash_values(&keys::deduct_log(activity_id))
            .await?;
        let mut records = Vec::with_capacity(blobs.len());
        for blob in blobs {
            records.push(serde_json::from_str(&blob)?);
        }
        Ok(records)
    }

    pub fn filter(&self) -> &AvailabilityFilter {
        &self.filter
    }
}

async fn read_int(store: &dyn HotStore, key: &str) -> Result<i64, SeckillError> {
    match store.get(key).await? {
        None => Ok(0),
        Some(s) => s
            .parse::<i64>()
            .map_err(|_| SeckillError::Internal(format!("non-numeric value at {}", key))),
    }
}

fn parse_try_reply(reply: &Reply) -> Result<TryOutcome, SeckillError> {
    let Reply::Multi(parts) = reply else {
        return Err(SeckillError::Internal("malformed try reply".into()));
    };
    let ok = parts.first().and_then(Reply::as_int);
    let message = parts.get(1).and_then(Reply::as_text);
    let count = parts.get(2).and_then(Reply::as_int).unwrap_or(0);
    match (ok, message) {
        (Some(status::OK), Some(status::SUCCESS)) => Ok(TryOutcome::Reserved { remaining: count }),
        (Some(status::ERR), Some(status::PURCHASE_LIMIT_EXCEEDED)) => Ok(TryOutcome::LimitExceeded),
        (Some(status::ERR), Some(status::INSUFFICIENT_STOCK)) => {
            Ok(TryOutcome::InsufficientStock { current: count })
        }
        _ => Err(SeckillError::Internal(format!(
            "unexpected try reply: {:?}",
            reply
        ))),
    }
}

fn parse_settle_reply(reply: &Reply, idempotent: &str) -> Result<SettleOutcome, SeckillError> {
    let Reply::Multi(parts) = reply else {
        return Err(SeckillError::Internal("malformed settle reply".into()));
    };
    let ok = parts.first().and_then(Reply::as_int);
    let message = parts.get(1).and_then(Reply::as_text);
    match (ok, message) {
        (Some(status::OK), Some(status::SUCCESS)) => Ok(SettleOutcome::Settled),
        (Some(status::OK), Some(msg)) if msg == idempotent => Ok(SettleOutcome::AlreadySettled),
        (Some(status::ERR), Some(status::DEDUCT_RECORD_NOT_FOUND)) => {
            Ok(SettleOutcome::RecordNotFound)
        }
        (Some(status::ERR), Some(_)) => Ok(SettleOutcome::Conflict),
        _ => Err(SeckillError::Internal(format!(
            "unexpected settle reply: {:?}",
            reply
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> InventoryManager {
        let store: Arc<dyn HotStore> = Arc::new(MemoryStore::new());
        let filter = Arc::new(AvailabilityFilter::new(1_000, 0.01, 600));
        InventoryManager::new(store, filter, 900, 86_400)
    }

    #[tokio::test]
    async fn test_try_confirm_lifecycle() {
        let inv = manager();
        inv.sync_to_hot_store(1, 10).await.unwrap();
        assert!(inv.filter().is_available(1));

        let outcome = inv.try_deduct(1, 1001, "d1", 2, 5).await.unwrap();
        assert_eq!(outcome, TryOutcome::Reserved { remaining: 8 });
        assert_eq!(inv.get_hot_stock(1).await.unwrap(), 8);
        assert_eq!(inv.get_reserved(1).await.unwrap(), 2);
        assert_eq!(inv.purchase_count(1, 1001).await.unwrap(), 2);

        let settle = inv.confirm(1, "d1").await.unwrap();
        assert_eq!(settle, SettleOutcome::Settled);
        assert_eq!(inv.get_hot_stock(1).await.unwrap(), 8);
        assert_eq!(inv.get_reserved(1).await.unwrap(), 0);

        // Replays are idempotent
        assert_eq!(inv.confirm(1, "d1").await.unwrap(), SettleOutcome::AlreadySettled);
        // Cancel of a confirmed reservation conflicts
        assert_eq!(inv.cancel(1, "d1").await.unwrap(), SettleOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_cancel_restores_and_reopens() {
        let inv = manager();
        inv.sync_to_hot_store(1, 1).await.unwrap();

        let outcome = inv.try_deduct(1, 1001, "d1", 1, 5).await.unwrap();
        assert_eq!(outcome, TryOutcome::Reserved { remaining: 0 });
        // Last unit reserved: locally sold out
        assert!(!inv.filter().is_available(1));

        assert_eq!(inv.cancel(1, "d1").await.unwrap(), SettleOutcome::Settled);
        assert_eq!(inv.get_hot_stock(1).await.unwrap(), 1);
        // Stock restored: available again
        assert!(inv.filter().is_available(1));
    }

    #[tokio::test]
    async fn test_per_user_cap_across_tries() {
        let inv = manager();
        inv.sync_to_hot_store(1, 100).await.unwrap();

        assert_eq!(
            inv.try_deduct(1, 1001, "d1", 2, 2).await.unwrap(),
            TryOutcome::Reserved { remaining: 98 }
        );
        assert_eq!(
            inv.try_deduct(1, 1001, "d2", 1, 2).await.unwrap(),
            TryOutcome::LimitExceeded
        );
        // Another user unaffected
        assert!(matches!(
            inv.try_deduct(1, 1002, "d3", 2, 2).await.unwrap(),
            TryOutcome::Reserved { .. }
        ));
        assert_eq!(inv.purchase_count(1, 1001).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_stock_marks_sold_out() {
        let inv = manager();
        inv.sync_to_hot_store(1, 0).await.unwrap();
        // Zero stock sync already marks sold out
        assert!(!inv.filter().is_available(1));

        let outcome = inv.try_deduct(1, 1001, "d1", 1, 5).await.unwrap();
        assert_eq!(outcome, TryOutcome::InsufficientStock { current: 0 });
    }

    #[tokio::test]
    async fn test_outstanding_reservations_listed() {
        let inv = manager();
        inv.sync_to_hot_store(1, 10).await.unwrap();
        inv.try_deduct(1, 1001, "d1", 1, 5).await.unwrap();
        inv.try_deduct(1, 1002, "d2", 2, 5).await.unwrap();
        inv.confirm(1, "d1").await.unwrap();

        let records = inv.outstanding_reservations(1).await.unwrap();
        assert_eq!(records.len(), 2);
        // The log keeps the Try-time snapshot; the standalone record
        // carries settlement
        let quantities: i64 = records.iter().map(|r| r.quantity).sum();
        assert_eq!(quantities, 3);
    }

    #[tokio::test]
    async fn test_restock_reverses_a_settled_sale() {
        let inv = manager();
        inv.sync_to_hot_store(1, 1).await.unwrap();
        inv.try_deduct(1, 1001, "d1", 1, 5).await.unwrap();
        inv.confirm(1, "d1").await.unwrap();
        // Sale settled: stock gone, activity locally sold out
        assert_eq!(inv.get_hot_stock(1).await.unwrap(), 0);
        assert!(!inv.filter().is_available(1));

        let remaining = inv.restock(1, 1).await.unwrap();
        assert_eq!(remaining, 1);
        assert_eq!(inv.get_hot_stock(1).await.unwrap(), 1);
        assert!(inv.filter().is_available(1));
    }

    #[tokio::test]
    async fn test_confirm_missing_record() {
        let inv = manager();
        assert_eq!(
            inv.confirm(1, "ghost").await.unwrap(),
            SettleOutcome::RecordNotFound
        );
        assert_eq!(
            inv.cancel(1, "ghost").await.unwrap(),
            SettleOutcome::RecordNotFound
        );
    }
}
