//! Sale pipeline request/response/message types

use crate::core_types::{ActivityId, Cents, GoodsId, Quantity, UserId};
use crate::error::SeckillError;
use serde::{Deserialize, Serialize};

/// A purchase attempt entering the pipeline
#[derive(Debug, Clone)]
pub struct SaleRequest {
    /// Client-generated idempotency key
    pub request_id: String,
    pub activity_id: ActivityId,
    pub user_id: UserId,
    pub quantity: Quantity,
    pub ip: String,
    pub device_id: Option<String>,
    pub user_agent: Option<String>,
    /// Routes the resulting order message to the VIP lane
    pub vip: bool,
}

/// The memoized outcome of a sale attempt
///
/// `order_id` stays empty on success: the order worker creates the
/// durable order asynchronously and clients resolve it through
/// `query_result` / order lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleResult {
    pub success: bool,
    pub request_id: String,
    pub order_id: String,
    pub code: String,
    pub message: String,
}

impl SaleResult {
    /// Admitted: reservation made, order in flight
    pub fn processing(request_id: &str) -> Self {
        Self {
            success: true,
            request_id: request_id.to_string(),
            order_id: String::new(),
            code: "PROCESSING".to_string(),
            message: "processing".to_string(),
        }
    }

    pub fn failure(request_id: &str, error: &SeckillError) -> Self {
        Self {
            success: false,
            request_id: request_id.to_string(),
            order_id: String::new(),
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// The settlement hand-off from pipeline to order worker, JSON-encoded
/// on the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderMessage {
    pub request_id: String,
    pub activity_id: ActivityId,
    pub user_id: UserId,
    pub goods_id: GoodsId,
    pub quantity: Quantity,
    pub unit_price: Cents,
    pub deduct_id: String,
    /// Unix millis at publish time
    pub ts: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_result_shape() {
        let result = SaleResult::processing("r1");
        assert!(result.success);
        assert_eq!(result.order_id, "");
        assert_eq!(result.message, "processing");
    }

    #[test]
    fn test_failure_carries_code() {
        let result = SaleResult::failure("r1", &SeckillError::SoldOut);
        assert!(!result.success);
        assert_eq!(result.code, "SOLD_OUT");
    }

    #[test]
    fn test_order_message_json_contract() {
        let message = OrderMessage {
            request_id: "r1".to_string(),
            activity_id: 42,
            user_id: 1001,
            goods_id: 10,
            quantity: 2,
            unit_price: 9900,
            deduct_id: "deduct:r1:123".to_string(),
            ts: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&message).unwrap();
        for field in [
            "request_id",
            "activity_id",
            "user_id",
            "goods_id",
            "quantity",
            "unit_price",
            "deduct_id",
            "ts",
        ] {
            assert!(json.contains(field), "missing field {}", field);
        }
    }
}
