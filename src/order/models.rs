//! Order models
//!
//! One order per admitted request; the `request_id` unique constraint
//! is the durable half of the idempotency story. Money is minor units
//! throughout.

use crate::core_types::{ActivityId, Cents, GoodsId, OrderId, Quantity, UserId};
use crate::seckill::OrderMessage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle status, stored as SMALLINT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum OrderStatus {
    Pending = 0,
    Paid = 1,
    Cancelled = 2,
    Refunded = 3,
    Completed = 4,
}

impl OrderStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(OrderStatus::Pending),
            1 => Some(OrderStatus::Paid),
            2 => Some(OrderStatus::Cancelled),
            3 => Some(OrderStatus::Refunded),
            4 => Some(OrderStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
            OrderStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable order row
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub order_no: String,
    pub request_id: String,
    pub user_id: UserId,
    pub activity_id: ActivityId,
    pub goods_id: GoodsId,
    pub quantity: Quantity,
    pub unit_price: Cents,
    pub total_amount: Cents,
    pub payment_amount: Cents,
    pub status: OrderStatus,
    pub needs_compensation: bool,
    pub deduct_id: String,
    pub expire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Build the pending order for an admitted reservation
    pub fn from_message(order_id: OrderId, message: &OrderMessage, expire_in: Duration) -> Self {
        let now = Utc::now();
        let total_amount = message.quantity * message.unit_price;
        Self {
            id: order_id,
            order_no: format!("SK{}", order_id),
            request_id: message.request_id.clone(),
            user_id: message.user_id,
            activity_id: message.activity_id,
            goods_id: message.goods_id,
            quantity: message.quantity,
            unit_price: message.unit_price,
            total_amount,
            payment_amount: total_amount,
            status: OrderStatus::Pending,
            needs_compensation: false,
            deduct_id: message.deduct_id.clone(),
            expire_at: now + expire_in,
            created_at: now,
            paid_at: None,
        }
    }

    /// The matching detail row
    pub fn detail(&self) -> OrderDetail {
        OrderDetail {
            order_id: self.id,
            goods_id: self.goods_id,
            goods_name: String::new(),
            quantity: self.quantity,
            unit_price: self.unit_price,
        }
    }
}

/// One order_details row (flash sales carry exactly one)
#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order_id: OrderId,
    pub goods_id: GoodsId,
    pub goods_name: String,
    pub quantity: Quantity,
    pub unit_price: Cents,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OrderMessage {
        OrderMessage {
            request_id: "r1".to_string(),
            activity_id: 42,
            user_id: 1001,
            goods_id: 10,
            quantity: 3,
            unit_price: 2500,
            deduct_id: "deduct:r1:99".to_string(),
            ts: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
            OrderStatus::Completed,
        ] {
            assert_eq!(OrderStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(OrderStatus::from_id(42), None);
    }

    #[test]
    fn test_order_from_message() {
        let order = Order::from_message(777, &message(), Duration::minutes(15));
        assert_eq!(order.order_no, "SK777");
        assert_eq!(order.total_amount, 7500);
        assert_eq!(order.payment_amount, 7500);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.deduct_id, "deduct:r1:99");
        let window = order.expire_at - order.created_at;
        assert_eq!(window, Duration::minutes(15));
    }

    #[test]
    fn test_detail_mirrors_order() {
        let order = Order::from_message(777, &message(), Duration::minutes(15));
        let detail = order.detail();
        assert_eq!(detail.order_id, 777);
        assert_eq!(detail.quantity, 3);
        assert_eq!(detail.unit_price, 2500);
    }
}
