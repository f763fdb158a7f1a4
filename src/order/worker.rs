//! Order worker
//!
//! Consumes reservation messages and turns each into exactly one
//! durable order. Idempotent by `request_id`: redelivered messages
//! and duplicate reservations from racing admissions settle cleanly.
//! Two lanes run side by side: dedicated VIP workers, plus shared
//! workers that probe the VIP lane briefly before serving the normal
//! one, which gives priority without starving either lane.

use super::models::Order;
use super::repository::OrderStore;
use crate::config::WorkerConfig;
use crate::idgen::IdGenerator;
use crate::inventory::InventoryManager;
use crate::queue::OrderQueue;
use crate::seckill::OrderMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct OrderWorker {
    queue: Arc<OrderQueue>,
    orders: Arc<dyn OrderStore>,
    inventory: Arc<InventoryManager>,
    id_gen: Arc<IdGenerator>,
    config: WorkerConfig,
    order_expire: chrono::Duration,
}

impl OrderWorker {
    pub fn new(
        queue: Arc<OrderQueue>,
        orders: Arc<dyn OrderStore>,
        inventory: Arc<InventoryManager>,
        id_gen: Arc<IdGenerator>,
        config: WorkerConfig,
        order_expire_secs: u64,
    ) -> Self {
        Self {
            queue,
            orders,
            inventory,
            id_gen,
            config,
            order_expire: chrono::Duration::seconds(order_expire_secs as i64),
        }
    }

    /// Spawn all configured worker tasks
    pub fn spawn_all(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for n in 0..self.config.vip_count {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run_vip(n, shutdown).await;
            }));
        }
        for n in 0..self.config.shared_count {
            let worker = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run_shared(n, shutdown).await;
            }));
        }
        info!(
            vip = self.config.vip_count,
            shared = self.config.shared_count,
            "Order workers started"
        );
        handles
    }

    /// Dedicated VIP-lane worker
    async fn run_vip(&self, n: usize, mut shutdown: watch::Receiver<bool>) {
        let poll = Duration::from_millis(self.config.poll_ms);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(worker = n, lane = "vip", "Order worker stopping");
                    return;
                }
                message = self.queue.recv_vip(poll) => {
                    if let Some(message) = message {
                        self.handle(message).await;
                    }
                }
            }
        }
    }

    /// Shared worker: short VIP probe first, then the normal lane
    async fn run_shared(&self, n: usize, mut shutdown: watch::Receiver<bool>) {
        let probe = Duration::from_millis(self.config.vip_probe_ms);
        let poll = Duration::from_millis(self.config.poll_ms);
        loop {
            if *shutdown.borrow() {
                info!(worker = n, lane = "shared", "Order worker stopping");
                return;
            }
            if let Some(message) = self.queue.recv_vip(probe).await {
                self.handle(message).await;
                continue;
            }
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(worker = n, lane = "shared", "Order worker stopping");
                    return;
                }
                message = self.queue.recv_normal(poll) => {
                    if let Some(message) = message {
                        self.handle(message).await;
                    }
                }
            }
        }
    }

    async fn handle(&self, message: OrderMessage) {
        if let Err(e) = self.process_message(&message).await {
            error!(
                request_id = %message.request_id,
                deduct_id = %message.deduct_id,
                error = %e,
                "Order settlement failed"
            );
        }
    }

    /// Settle one message: order insert then Confirm, with Cancel as
    /// the compensation for every failure before the order exists.
    pub async fn process_message(&self, message: &OrderMessage) -> Result<(), anyhow::Error> {
        // Idempotency: an order for this request already exists
        if let Some(existing) = self.orders.find_by_request_id(&message.request_id).await? {
            if existing.deduct_id != message.deduct_id {
                // A racing admission of the same request made a second
                // reservation; release it so it cannot leak until TTL
                debug!(
                    request_id = %message.request_id,
                    deduct_id = %message.deduct_id,
                    "Cancelling duplicate reservation"
                );
                let _ = self
                    .inventory
                    .cancel(message.activity_id, &message.deduct_id)
                    .await;
            }
            return Ok(());
        }

        let order_id = self.id_gen.next_id();
        let order = Order::from_message(order_id, message, self.order_expire);
        let detail = order.detail();

        if let Err(e) = self.orders.create_with_detail(&order, &detail).await {
            if e.is_conflict()
                && let Some(existing) = self.orders.find_by_request_id(&message.request_id).await?
            {
                // Lost the insert race to a concurrent delivery of the
                // same request; that delivery owns the settlement
                debug!(request_id = %message.request_id, "Order already created concurrently");
                if existing.deduct_id != message.deduct_id {
                    let _ = self
                        .inventory
                        .cancel(message.activity_id, &message.deduct_id)
                        .await;
                }
                return Ok(());
            }
            // Order could not be written: release the reservation
            warn!(
                request_id = %message.request_id,
                error = %e,
                "Order insert failed, cancelling reservation"
            );
            self.inventory
                .cancel(message.activity_id, &message.deduct_id)
                .await?;
            return Err(e.into());
        }

        // Order persisted: settle the reservation
        match self
            .inventory
            .confirm(message.activity_id, &message.deduct_id)
            .await
        {
            Ok(outcome) if outcome.is_ok() => {
                info!(
                    request_id = %message.request_id,
                    order_id,
                    order_no = %order.order_no,
                    "Order settled"
                );
                Ok(())
            }
            Ok(outcome) => {
                // The order stands; flag it for the compensation path
                error!(
                    request_id = %message.request_id,
                    order_id,
                    ?outcome,
                    "Confirm rejected after order insert, flagging for compensation"
                );
                self.orders.mark_needs_compensation(order_id).await?;
                Ok(())
            }
            Err(e) => {
                error!(
                    request_id = %message.request_id,
                    order_id,
                    error = %e,
                    "Confirm failed after order insert, flagging for compensation"
                );
                self.orders.mark_needs_compensation(order_id).await?;
                Ok(())
            }
        }
    }
}
