//! Sale transaction engine: the ordered admission pipeline,
//! idempotent results, and activity prewarming.

mod engine;
mod types;

pub use engine::SeckillEngine;
pub use types::{OrderMessage, SaleRequest, SaleResult};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Activity, ActivityStatus, MemoryActivityStore, PrewarmStatus};
    use crate::bloom::AvailabilityFilter;
    use crate::breaker::BreakerManager;
    use crate::config::{AppConfig, RateConfig};
    use crate::inventory::InventoryManager;
    use crate::limiter::RateLimiter;
    use crate::queue::OrderQueue;
    use crate::store::{HotStore, MemoryStore};
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        engine: SeckillEngine,
        activities: Arc<MemoryActivityStore>,
        queue: Arc<OrderQueue>,
        store: Arc<dyn HotStore>,
    }

    fn harness() -> Harness {
        harness_with_rate(RateConfig::default())
    }

    fn harness_with_rate(rate: RateConfig) -> Harness {
        let config = AppConfig::default();
        let store: Arc<dyn HotStore> = Arc::new(MemoryStore::new());
        let filter = Arc::new(AvailabilityFilter::new(
            config.bloom.size,
            config.bloom.fp_rate,
            config.bloom.local_cache_ttl_secs,
        ));
        let inventory = Arc::new(InventoryManager::new(
            store.clone(),
            filter,
            config.seckill.reservation_ttl_secs,
            config.seckill.purchase_count_ttl_secs,
        ));
        let limiter = Arc::new(RateLimiter::new(store.clone(), rate));
        let breakers = Arc::new(BreakerManager::new(config.breaker.clone()));
        let activities = Arc::new(MemoryActivityStore::new());
        let queue = Arc::new(OrderQueue::new());
        let engine = SeckillEngine::new(
            store.clone(),
            inventory,
            limiter,
            breakers,
            activities.clone(),
            queue.clone(),
            config.seckill.clone(),
        );
        Harness {
            engine,
            activities,
            queue,
            store,
        }
    }

    fn running_activity(id: i64, stock: i64, limit: i64) -> Activity {
        let now = Utc::now();
        Activity {
            id,
            goods_id: 10,
            unit_price: 9900,
            total_stock: stock,
            sold_count: 0,
            start_at: now - ChronoDuration::minutes(1),
            end_at: now + ChronoDuration::hours(1),
            limit_per_user: limit,
            status: ActivityStatus::Running,
            gray_ratio: 0.0,
            gray_whitelist: Vec::new(),
            prewarm_status: PrewarmStatus::Cold,
        }
    }

    fn request(request_id: &str, activity_id: i64, user_id: i64) -> SaleRequest {
        SaleRequest {
            request_id: request_id.to_string(),
            activity_id,
            user_id,
            quantity: 1,
            ip: "10.0.0.1".to_string(),
            device_id: None,
            user_agent: Some("test-agent".to_string()),
            vip: false,
        }
    }

    #[tokio::test]
    async fn test_sale_happy_path_publishes_message() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 2));
        h.engine.prewarm(1).await.unwrap();

        let result = h.engine.do_sale(&request("r1", 1, 1001)).await;
        assert!(result.success, "unexpected: {:?}", result);
        assert_eq!(result.message, "processing");
        assert_eq!(result.order_id, "");

        let message = h
            .queue
            .recv_normal(Duration::from_millis(100))
            .await
            .expect("message published");
        assert_eq!(message.request_id, "r1");
        assert_eq!(message.unit_price, 9900);
        assert!(message.deduct_id.starts_with("deduct:r1:"));
    }

    #[tokio::test]
    async fn test_unknown_activity_rejected_by_bloom() {
        let h = harness();
        // Nothing prewarmed: bloom has never seen activity 9
        let result = h.engine.do_sale(&request("r1", 9, 1001)).await;
        assert!(!result.success);
        assert_eq!(result.code, "SOLD_OUT");
    }

    #[tokio::test]
    async fn test_quantity_validation() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 5));
        h.engine.prewarm(1).await.unwrap();

        let mut req = request("r1", 1, 1001);
        req.quantity = 6;
        let result = h.engine.do_sale(&req).await;
        assert_eq!(result.code, "INVALID_QUANTITY");

        let mut req = request("r2", 1, 1001);
        req.quantity = 0;
        let result = h.engine.do_sale(&req).await;
        assert_eq!(result.code, "INVALID_QUANTITY");
    }

    #[tokio::test]
    async fn test_idempotent_result_returned_verbatim() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 2));
        h.engine.prewarm(1).await.unwrap();

        let first = h.engine.do_sale(&request("r1", 1, 1001)).await;
        let second = h.engine.do_sale(&request("r1", 1, 1001)).await;
        assert_eq!(first, second);
        // Only one reservation made
        let message = h.queue.recv_normal(Duration::from_millis(50)).await;
        assert!(message.is_some());
        assert!(h.queue.recv_normal(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test]
    async fn test_failure_outcomes_are_memoized() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 2));
        h.engine.prewarm(1).await.unwrap();

        let mut req = request("r1", 1, 1001);
        req.quantity = 9;
        let first = h.engine.do_sale(&req).await;
        assert_eq!(first.code, "INVALID_QUANTITY");

        // Same request id with a now-valid quantity still gets the
        // memoized answer
        let mut retry = request("r1", 1, 1001);
        retry.quantity = 1;
        let second = h.engine.do_sale(&retry).await;
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_not_running_activity_rejected() {
        let h = harness();
        let mut activity = running_activity(1, 5, 2);
        activity.status = ActivityStatus::Paused;
        h.activities.insert(activity);
        // Prewarm the filter by hand; the status gate must still hold
        h.engine.filter().add(1);

        let result = h.engine.do_sale(&request("r1", 1, 1001)).await;
        assert_eq!(result.code, "ACTIVITY_NOT_RUNNING");
    }

    #[tokio::test]
    async fn test_gray_ratio_gates_users() {
        let h = harness();
        let mut activity = running_activity(1, 50, 2);
        activity.gray_ratio = 0.3;
        activity.gray_whitelist = vec![1130];
        h.activities.insert(activity);
        h.engine.prewarm(1).await.unwrap();

        // 1025 % 100 = 25 < 30: admitted
        assert!(h.engine.do_sale(&request("r1", 1, 1025)).await.success);
        // 1030 % 100 = 30: denied
        let denied = h.engine.do_sale(&request("r2", 1, 1030)).await;
        assert_eq!(denied.code, "NOT_IN_GRAY_RANGE");
        // 1130 % 100 = 30 but whitelisted
        assert!(h.engine.do_sale(&request("r3", 1, 1130)).await.success);
    }

    #[tokio::test]
    async fn test_blacklisted_user_rejected() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 2));
        h.engine.prewarm(1).await.unwrap();
        h.store
            .set_ex("blacklist:user:1001", "1", Duration::from_secs(3600))
            .await
            .unwrap();

        let result = h.engine.do_sale(&request("r1", 1, 1001)).await;
        assert_eq!(result.code, "NOT_ELIGIBLE");
    }

    #[tokio::test]
    async fn test_rate_limit_denial_memoized() {
        let h = harness_with_rate(RateConfig {
            user: 1,
            ..RateConfig::default()
        });
        h.activities.insert(running_activity(1, 50, 10));
        h.engine.prewarm(1).await.unwrap();

        assert!(h.engine.do_sale(&request("r1", 1, 1001)).await.success);
        let denied = h.engine.do_sale(&request("r2", 1, 1001)).await;
        assert_eq!(denied.code, "RATE_LIMITED");

        let replay = h.engine.do_sale(&request("r2", 1, 1001)).await;
        assert_eq!(replay, denied);
    }

    #[tokio::test]
    async fn test_sold_out_after_stock_drained() {
        let h = harness();
        h.activities.insert(running_activity(1, 1, 5));
        h.engine.prewarm(1).await.unwrap();

        assert!(h.engine.do_sale(&request("r1", 1, 1001)).await.success);
        // Stock hit zero: the next user is cut off by the local marker
        let result = h.engine.do_sale(&request("r2", 1, 1002)).await;
        assert!(!result.success);
        assert_eq!(result.code, "SOLD_OUT");
    }

    #[tokio::test]
    async fn test_query_result_roundtrip() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 2));
        h.engine.prewarm(1).await.unwrap();

        let result = h.engine.do_sale(&request("r1", 1, 1001)).await;
        let queried = h.engine.query_result("r1", 1001).await.unwrap();
        assert_eq!(queried, result);

        let missing = h.engine.query_result("ghost", 1001).await;
        assert!(matches!(
            missing,
            Err(crate::error::SeckillError::ResultNotFound)
        ));
    }

    #[tokio::test]
    async fn test_prewarm_idempotent() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 2));
        h.engine.prewarm(1).await.unwrap();
        h.engine.prewarm(1).await.unwrap();
        let result = h.engine.do_sale(&request("r1", 1, 1001)).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_vip_flag_routes_to_vip_lane() {
        let h = harness();
        h.activities.insert(running_activity(1, 5, 2));
        h.engine.prewarm(1).await.unwrap();

        let mut req = request("r1", 1, 1001);
        req.vip = true;
        assert!(h.engine.do_sale(&req).await.success);
        assert!(h.queue.recv_normal(Duration::from_millis(30)).await.is_none());
        assert!(h.queue.recv_vip(Duration::from_millis(30)).await.is_some());
    }
}
