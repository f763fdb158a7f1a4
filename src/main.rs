//! flashmall - Flash-Sale Engine
//!
//! Binary entry point. Wires the hot store, durable repositories,
//! engine, workers and background tasks, then serves the gateway:
//!
//! ```text
//! ┌─────────┐   ┌──────────┐   ┌───────┐   ┌─────────┐
//! │ Gateway │──▶│ Pipeline │──▶│ Queue │──▶│ Workers │──▶ PostgreSQL
//! └─────────┘   └──────────┘   └───────┘   └─────────┘
//!                    │   hot store (TCC scripts)  ▲
//!                    └────────────┬───────────────┘
//!                        sweeper / reconciler
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use flashmall::activity::PgActivityRepository;
use flashmall::bloom::AvailabilityFilter;
use flashmall::breaker::BreakerManager;
use flashmall::config::AppConfig;
use flashmall::db::{Database, schema};
use flashmall::gateway::{self, AppState};
use flashmall::idgen::IdGenerator;
use flashmall::inventory::InventoryManager;
use flashmall::limiter::RateLimiter;
use flashmall::order::{OrderWorker, PgOrderRepository};
use flashmall::queue::OrderQueue;
use flashmall::reconciler::StockReconciler;
use flashmall::seckill::SeckillEngine;
use flashmall::store::{HotStore, MemoryStore};
use flashmall::sweeper::ExpirySweeper;

fn load_config() -> AppConfig {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/flashmall.yaml".to_string());
    match AppConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config {} not loaded ({}), using defaults", path, e);
            AppConfig::default()
        }
    }
}

fn node_id() -> u64 {
    std::env::var("FLASHMALL_NODE_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config();
    let _log_guard = flashmall::logging::init_logging(&config.log);
    info!("flashmall starting");

    // Durable store
    let database = Database::connect(&config.database).await?;
    schema::init_schema(database.pool()).await?;
    let activities = Arc::new(PgActivityRepository::new(database.pool().clone()));
    let orders = Arc::new(PgOrderRepository::new(database.pool().clone()));

    // Hot store and engine components
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
    let limiter = Arc::new(RateLimiter::new(store.clone(), config.rate.clone()));
    let breakers = Arc::new(BreakerManager::new(config.breaker.clone()));
    let queue = Arc::new(OrderQueue::new());
    let id_gen = Arc::new(IdGenerator::new(node_id()));

    let engine = Arc::new(SeckillEngine::new(
        store.clone(),
        inventory.clone(),
        limiter,
        breakers,
        activities.clone(),
        queue.clone(),
        config.seckill.clone(),
    ));

    // Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Arc::new(OrderWorker::new(
        queue,
        orders.clone(),
        inventory.clone(),
        id_gen,
        config.worker.clone(),
        config.seckill.order_expire_secs,
    ));
    let mut handles = worker.spawn_all(shutdown_rx.clone());

    let sweeper = ExpirySweeper::new(orders, inventory.clone(), config.sweeper.clone());
    let sweeper_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        sweeper.run(sweeper_shutdown).await;
    }));

    let reconciler = Arc::new(StockReconciler::new(
        store,
        inventory,
        activities,
        config.reconciler.clone(),
        config.seckill.reservation_ttl_secs,
        config.seckill.activity_cache_ttl_secs,
    ));
    let reconciler_task = reconciler.clone();
    let reconciler_shutdown = shutdown_rx;
    handles.push(tokio::spawn(async move {
        reconciler_task.run(reconciler_shutdown).await;
    }));

    // Gateway
    let state = Arc::new(AppState::new(
        engine,
        reconciler,
        Duration::from_secs(config.seckill.request_timeout_secs),
    ));
    let app = gateway::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Shutdown signal listener failed");
            }
            info!("Shutdown signal received");
        })
        .await?;

    // Stop background tasks and drain
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    info!("flashmall stopped");
    Ok(())
}
