//! In-process order queue
//!
//! Two lanes, `seckill_orders_vip` and `seckill_orders`, carrying
//! JSON-encoded [`OrderMessage`]s. Delivery is at-least-once: the
//! consumer side is idempotent by `request_id`, so a message seen
//! twice settles once. Bounded buffers make a full lane an immediate
//! publish failure the sale pipeline can compensate for, instead of
//! silent backpressure on the hot path.

use crate::seckill::OrderMessage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

pub const TOPIC_ORDERS: &str = "seckill_orders";
pub const TOPIC_ORDERS_VIP: &str = "seckill_orders_vip";

const DEFAULT_CAPACITY: usize = 65_536;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Topic {0} is full")]
    Full(&'static str),

    #[error("Topic {0} is closed")]
    Closed(&'static str),

    #[error("Encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One named lane. Receivers share a mutex so any number of workers
/// can poll; mpsc delivers each message to exactly one of them.
struct Topic {
    name: &'static str,
    tx: mpsc::Sender<String>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
}

impl Topic {
    fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    fn publish(&self, payload: String) -> Result<(), QueueError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full(self.name),
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed(self.name),
        })
    }

    /// Blocking poll with a deadline; None on timeout or closed lane
    async fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }
}

/// Both order lanes
pub struct OrderQueue {
    normal: Topic,
    vip: Topic,
}

impl Default for OrderQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl OrderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            normal: Topic::new(TOPIC_ORDERS, capacity),
            vip: Topic::new(TOPIC_ORDERS_VIP, capacity),
        }
    }

    /// Publish to the VIP or normal lane
    pub fn publish(&self, message: &OrderMessage, vip: bool) -> Result<(), QueueError> {
        let payload = serde_json::to_string(message)?;
        let topic = if vip { &self.vip } else { &self.normal };
        topic.publish(payload)
    }

    pub async fn recv_normal(&self, timeout: Duration) -> Option<OrderMessage> {
        decode(self.normal.recv_timeout(timeout).await, TOPIC_ORDERS)
    }

    pub async fn recv_vip(&self, timeout: Duration) -> Option<OrderMessage> {
        decode(self.vip.recv_timeout(timeout).await, TOPIC_ORDERS_VIP)
    }
}

/// Malformed payloads are dropped with a warning; at-least-once means
/// the producer side still owns compensation for lost work
fn decode(payload: Option<String>, topic: &'static str) -> Option<OrderMessage> {
    let payload = payload?;
    match serde_json::from_str(&payload) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(topic, error = %e, "Dropping undecodable message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(request_id: &str) -> OrderMessage {
        OrderMessage {
            request_id: request_id.to_string(),
            activity_id: 1,
            user_id: 1001,
            goods_id: 10,
            quantity: 1,
            unit_price: 9900,
            deduct_id: format!("deduct:{}:1", request_id),
            ts: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_publish_and_consume_roundtrip() {
        let queue = OrderQueue::new();
        queue.publish(&message("r1"), false).unwrap();

        let got = queue.recv_normal(Duration::from_millis(100)).await.unwrap();
        assert_eq!(got.request_id, "r1");
        assert_eq!(got.unit_price, 9900);
    }

    #[tokio::test]
    async fn test_lanes_are_independent() {
        let queue = OrderQueue::new();
        queue.publish(&message("vip1"), true).unwrap();

        assert!(queue.recv_normal(Duration::from_millis(20)).await.is_none());
        let got = queue.recv_vip(Duration::from_millis(100)).await.unwrap();
        assert_eq!(got.request_id, "vip1");
    }

    #[tokio::test]
    async fn test_full_lane_fails_fast() {
        let queue = OrderQueue::with_capacity(1);
        queue.publish(&message("r1"), false).unwrap();
        let err = queue.publish(&message("r2"), false).unwrap_err();
        assert!(matches!(err, QueueError::Full(TOPIC_ORDERS)));
    }

    #[tokio::test]
    async fn test_each_message_delivered_once() {
        let queue = Arc::new(OrderQueue::new());
        for i in 0..20 {
            queue.publish(&message(&format!("r{}", i)), false).unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(m) = queue.recv_normal(Duration::from_millis(50)).await {
                    got.push(m.request_id);
                }
                got
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }
}
