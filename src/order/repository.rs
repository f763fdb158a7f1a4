//! Order repository
//!
//! `create_with_detail` is the worker's single durable transaction:
//! order row, detail row, and the activity sold-count bump with its
//! in-SQL guard. A crash can therefore never record a sale without
//! its order or vice versa.

use super::models::{Order, OrderDetail, OrderStatus};
use crate::activity::MemoryActivityStore;
use crate::core_types::OrderId;
use crate::db::RepoError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::{Arc, Mutex};

/// Durable order port
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<Order>, RepoError>;

    /// Insert order + detail + guarded `sold_count += quantity` in one
    /// transaction
    async fn create_with_detail(
        &self,
        order: &Order,
        detail: &OrderDetail,
    ) -> Result<(), RepoError>;

    /// Pending orders whose payment deadline has passed
    async fn list_expired(&self, limit: i64) -> Result<Vec<Order>, RepoError>;

    /// Guarded pending→cancelled transition, giving the activity its
    /// sold_count back in the same transaction; false when the order
    /// was no longer pending
    async fn cancel_if_pending(&self, order_id: OrderId) -> Result<bool, RepoError>;

    /// Flag an order whose reservation could not be confirmed; the
    /// admin compensation path picks these up
    async fn mark_needs_compensation(&self, order_id: OrderId) -> Result<(), RepoError>;
}

// ============================================================
// PostgreSQL implementation
// ============================================================

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Order, RepoError> {
        let status_id: i16 = row.get("status");
        Ok(Order {
            id: row.get("id"),
            order_no: row.get("order_no"),
            request_id: row.get("request_id"),
            user_id: row.get("user_id"),
            activity_id: row.get("activity_id"),
            goods_id: row.get("goods_id"),
            quantity: row.get("quantity"),
            unit_price: row.get("unit_price"),
            total_amount: row.get("total_amount"),
            payment_amount: row.get("payment_amount"),
            status: OrderStatus::from_id(status_id)
                .ok_or_else(|| RepoError::Conflict(format!("unknown status {}", status_id)))?,
            needs_compensation: row.get("needs_compensation"),
            deduct_id: row.get("deduct_id"),
            expire_at: row.get::<DateTime<Utc>, _>("expire_at"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            paid_at: row.get::<Option<DateTime<Utc>>, _>("paid_at"),
        })
    }
}

const ORDER_COLUMNS: &str = "id, order_no, request_id, user_id, activity_id, goods_id, quantity, \
     unit_price, total_amount, payment_amount, status, needs_compensation, deduct_id, expire_at, \
     created_at, paid_at";

#[async_trait]
impl OrderStore for PgOrderRepository {
    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<Order>, RepoError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE request_id = $1",
            ORDER_COLUMNS
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn create_with_detail(
        &self,
        order: &Order,
        detail: &OrderDetail,
    ) -> Result<(), RepoError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO orders (id, order_no, request_id, user_id, activity_id, goods_id, \
             quantity, unit_price, total_amount, payment_amount, status, needs_compensation, \
             deduct_id, expire_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(order.id)
        .bind(&order.order_no)
        .bind(&order.request_id)
        .bind(order.user_id)
        .bind(order.activity_id)
        .bind(order.goods_id)
        .bind(order.quantity)
        .bind(order.unit_price)
        .bind(order.total_amount)
        .bind(order.payment_amount)
        .bind(order.status.id())
        .bind(order.needs_compensation)
        .bind(&order.deduct_id)
        .bind(order.expire_at)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO order_details (order_id, goods_id, goods_name, quantity, unit_price) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(detail.order_id)
        .bind(detail.goods_id)
        .bind(&detail.goods_name)
        .bind(detail.quantity)
        .bind(detail.unit_price)
        .execute(&mut *tx)
        .await?;

        let guarded = sqlx::query(
            "UPDATE seckill_activities SET sold_count = sold_count + $2 \
             WHERE id = $1 AND sold_count + $2 <= total_stock",
        )
        .bind(order.activity_id)
        .bind(order.quantity)
        .execute(&mut *tx)
        .await?;
        if guarded.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepoError::Conflict(format!(
                "sold_count guard rejected order {} for activity {}",
                order.id, order.activity_id
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_expired(&self, limit: i64) -> Result<Vec<Order>, RepoError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE status = $1 AND expire_at < NOW() \
             ORDER BY expire_at LIMIT $2",
            ORDER_COLUMNS
        ))
        .bind(OrderStatus::Pending.id())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn cancel_if_pending(&self, order_id: OrderId) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE orders SET status = $2 WHERE id = $1 AND status = $3 \
             RETURNING activity_id, quantity",
        )
        .bind(order_id)
        .bind(OrderStatus::Cancelled.id())
        .bind(OrderStatus::Pending.id())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let activity_id: i64 = row.get("activity_id");
        let quantity: i64 = row.get("quantity");

        // The unpaid units go back on sale; conservation against the
        // hot store depends on this moving with the status flip
        sqlx::query(
            "UPDATE seckill_activities SET sold_count = GREATEST(sold_count - $2, 0) \
             WHERE id = $1",
        )
        .bind(activity_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_needs_compensation(&self, order_id: OrderId) -> Result<(), RepoError> {
        sqlx::query("UPDATE orders SET needs_compensation = TRUE WHERE id = $1")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ============================================================
// In-memory implementation
// ============================================================

#[derive(Default)]
struct MemoryOrders {
    orders: Vec<Order>,
}

/// In-process order store for tests and local runs. Shares the
/// activity store so the sold-count guard behaves like the SQL
/// transaction.
pub struct MemoryOrderStore {
    inner: Mutex<MemoryOrders>,
    activities: Arc<MemoryActivityStore>,
}

impl MemoryOrderStore {
    pub fn new(activities: Arc<MemoryActivityStore>) -> Self {
        Self {
            inner: Mutex::new(MemoryOrders::default()),
            activities,
        }
    }

    pub fn order_count(&self) -> usize {
        self.inner.lock().unwrap().orders.len()
    }

    pub fn find_by_id(&self, order_id: OrderId) -> Option<Order> {
        self.inner
            .lock()
            .unwrap()
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
    }

    /// Backdate an order's payment deadline (scenario-test support:
    /// the sweeper must see it as already expired)
    pub fn expire_now(&self, order_id: OrderId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(order) = inner.orders.iter_mut().find(|o| o.id == order_id) {
            order.expire_at = Utc::now() - chrono::Duration::seconds(1);
        }
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<Order>, RepoError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .orders
            .iter()
            .find(|o| o.request_id == request_id)
            .cloned())
    }

    async fn create_with_detail(
        &self,
        order: &Order,
        _detail: &OrderDetail,
    ) -> Result<(), RepoError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.orders.iter().any(|o| o.request_id == order.request_id) {
            return Err(RepoError::Conflict(format!(
                "duplicate request_id {}",
                order.request_id
            )));
        }
        // Guard before insert, mirroring the SQL transaction order
        self.activities
            .try_increment_sold(order.activity_id, order.quantity)?;
        inner.orders.push(order.clone());
        Ok(())
    }

    async fn list_expired(&self, limit: i64) -> Result<Vec<Order>, RepoError> {
        let now = Utc::now();
        let mut expired: Vec<Order> = self
            .inner
            .lock()
            .unwrap()
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::Pending && o.expire_at < now)
            .cloned()
            .collect();
        expired.sort_by_key(|o| o.expire_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn cancel_if_pending(&self, order_id: OrderId) -> Result<bool, RepoError> {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.status == OrderStatus::Pending)
        {
            Some(order) => {
                order.status = OrderStatus::Cancelled;
                let (activity_id, quantity) = (order.activity_id, order.quantity);
                drop(inner);
                self.activities.decrement_sold(activity_id, quantity);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_needs_compensation(&self, order_id: OrderId) -> Result<(), RepoError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(order) = inner.orders.iter_mut().find(|o| o.id == order_id) {
            order.needs_compensation = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityStatus, ActivityStore, PrewarmStatus};
    use crate::seckill::OrderMessage;
    use chrono::Duration;

    fn setup() -> (Arc<MemoryActivityStore>, MemoryOrderStore) {
        let activities = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        activities.insert(Activity {
            id: 1,
            goods_id: 10,
            unit_price: 9900,
            total_stock: 2,
            sold_count: 0,
            start_at: now - Duration::minutes(1),
            end_at: now + Duration::hours(1),
            limit_per_user: 5,
            status: ActivityStatus::Running,
            gray_ratio: 0.0,
            gray_whitelist: Vec::new(),
            prewarm_status: PrewarmStatus::Cold,
        });
        let orders = MemoryOrderStore::new(activities.clone());
        (activities, orders)
    }

    fn order(id: OrderId, request_id: &str) -> Order {
        let message = OrderMessage {
            request_id: request_id.to_string(),
            activity_id: 1,
            user_id: 1001,
            goods_id: 10,
            quantity: 1,
            unit_price: 9900,
            deduct_id: format!("deduct:{}:1", request_id),
            ts: 0,
        };
        Order::from_message(id, &message, Duration::minutes(15))
    }

    #[tokio::test]
    async fn test_duplicate_request_id_conflicts() {
        let (_, orders) = setup();
        let o = order(1, "r1");
        orders.create_with_detail(&o, &o.detail()).await.unwrap();

        let dup = order(2, "r1");
        let err = orders
            .create_with_detail(&dup, &dup.detail())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(orders.order_count(), 1);
    }

    #[tokio::test]
    async fn test_sold_count_guard_blocks_oversell() {
        let (activities, orders) = setup();
        for i in 0..2 {
            let o = order(i, &format!("r{}", i));
            orders.create_with_detail(&o, &o.detail()).await.unwrap();
        }
        // total_stock 2 exhausted
        let third = order(3, "r3");
        let err = orders
            .create_with_detail(&third, &third.detail())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(activities.find(1).await.unwrap().unwrap().sold_count, 2);
    }

    #[tokio::test]
    async fn test_expiry_listing_and_cancel() {
        let (_, orders) = setup();
        let mut stale = order(1, "r1");
        stale.expire_at = Utc::now() - Duration::minutes(1);
        orders
            .create_with_detail(&stale, &stale.detail())
            .await
            .unwrap();
        let fresh = order(2, "r2");
        orders
            .create_with_detail(&fresh, &fresh.detail())
            .await
            .unwrap();

        let expired = orders.list_expired(10).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, 1);

        assert!(orders.cancel_if_pending(1).await.unwrap());
        // Second cancel is a no-op
        assert!(!orders.cancel_if_pending(1).await.unwrap());
        assert!(orders.list_expired(10).await.unwrap().is_empty());
    }
}
