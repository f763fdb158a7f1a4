//! Expiry sweeper
//!
//! Background task that finds pending orders past their payment
//! deadline, cancels them durably, and releases their reservations.
//! One failed cancellation never blocks the rest of the batch.

use crate::config::SweeperConfig;
use crate::inventory::{InventoryManager, SettleOutcome};
use crate::order::OrderStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct ExpirySweeper {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<InventoryManager>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<InventoryManager>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            orders,
            inventory,
            config,
        }
    }

    /// Run the sweep loop until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.interval_secs);
        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            "Expiry sweeper started"
        );
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Expiry sweeper stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Sweep cycle failed");
                    }
                }
            }
        }
    }

    /// One sweep cycle; returns how many orders were cancelled
    pub async fn sweep_once(&self) -> Result<usize, anyhow::Error> {
        let expired = self.orders.list_expired(self.config.batch_size).await?;
        if expired.is_empty() {
            debug!("No expired orders");
            return Ok(0);
        }

        let mut cancelled = 0;
        for order in &expired {
            // Durable transition first; a racing payment keeps its
            // order
            match self.orders.cancel_if_pending(order.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(order_id = order.id, "Order no longer pending, skipping");
                    continue;
                }
                Err(e) => {
                    error!(order_id = order.id, error = %e, "Cancel transition failed");
                    continue;
                }
            }

            cancelled += 1;
            match self
                .inventory
                .cancel(order.activity_id, &order.deduct_id)
                .await
            {
                Ok(outcome) if outcome.is_ok() => {
                    info!(
                        order_id = order.id,
                        order_no = %order.order_no,
                        activity_id = order.activity_id,
                        "Expired order cancelled, stock released"
                    );
                }
                Ok(SettleOutcome::Conflict) => {
                    // The worker already confirmed this reservation, so
                    // Cancel cannot undo it; the guarded status flip
                    // above ran exactly once, so put the sold units
                    // straight back on sale here
                    match self
                        .inventory
                        .restock(order.activity_id, order.quantity)
                        .await
                    {
                        Ok(_) => {
                            info!(
                                order_id = order.id,
                                order_no = %order.order_no,
                                activity_id = order.activity_id,
                                "Expired settled order cancelled, stock restocked"
                            );
                        }
                        Err(e) => {
                            warn!(
                                order_id = order.id,
                                activity_id = order.activity_id,
                                error = %e,
                                "Restock failed on expiry; reconciler will repair"
                            );
                        }
                    }
                }
                Ok(outcome) => {
                    // Record gone (TTL expired); stock is governed by
                    // the reconciler from here
                    warn!(
                        order_id = order.id,
                        deduct_id = %order.deduct_id,
                        ?outcome,
                        "Reservation not released on expiry"
                    );
                }
                Err(e) => {
                    warn!(
                        order_id = order.id,
                        deduct_id = %order.deduct_id,
                        error = %e,
                        "Reservation release failed on expiry"
                    );
                }
            }
        }

        if cancelled > 0 {
            info!(count = cancelled, "Expired orders swept");
        }
        Ok(cancelled)
    }
}
