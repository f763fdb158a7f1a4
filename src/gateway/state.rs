use std::sync::Arc;
use std::time::Duration;

use crate::reconciler::StockReconciler;
use crate::seckill::SeckillEngine;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// The sale transaction engine
    pub engine: Arc<SeckillEngine>,
    /// Admin reconcile operations
    pub reconciler: Arc<StockReconciler>,
    /// Hot-path budget for the sale endpoint
    pub seckill_timeout: Duration,
}

impl AppState {
    pub fn new(
        engine: Arc<SeckillEngine>,
        reconciler: Arc<StockReconciler>,
        seckill_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            reconciler,
            seckill_timeout,
        }
    }
}
