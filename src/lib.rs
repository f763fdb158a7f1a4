//! flashmall - Flash-Sale (Seckill) Engine
//!
//! A burst-admission sale engine: bounded inventory, per-user caps,
//! idempotent requests, asynchronous durable settlement.
//!
//! # Modules
//!
//! - [`core_types`] - Core type aliases (ActivityId, UserId, Cents, ...)
//! - [`config`] - YAML-backed application configuration
//! - [`store`] - Scripted hot-store primitives and the distributed lock
//! - [`bloom`] - Counting bloom filter + sold-out cache
//! - [`limiter`] - Multi-dimension sliding-window rate limiter
//! - [`breaker`] - Per-activity circuit breakers
//! - [`inventory`] - Try/Confirm/Cancel inventory manager
//! - [`seckill`] - The admission pipeline and result memoization
//! - [`queue`] - In-process order topics (VIP + normal lanes)
//! - [`order`] - Durable orders and the settlement worker
//! - [`sweeper`] - Payment-deadline expiry sweeper
//! - [`reconciler`] - Hot/durable stock reconciliation
//! - [`idgen`] - Snowflake order id generator
//! - [`gateway`] - Thin axum HTTP surface

// Core types - must be first!
pub mod core_types;

// Configuration & plumbing
pub mod config;
pub mod db;
pub mod error;
pub mod logging;

// Engine components
pub mod activity;
pub mod bloom;
pub mod breaker;
pub mod gateway;
pub mod idgen;
pub mod inventory;
pub mod limiter;
pub mod order;
pub mod queue;
pub mod reconciler;
pub mod seckill;
pub mod store;
pub mod sweeper;

// Convenient re-exports at crate root
pub use activity::{Activity, ActivityStatus, ActivityStore};
pub use bloom::AvailabilityFilter;
pub use breaker::{BreakerManager, BreakerState, CircuitBreaker};
pub use config::AppConfig;
pub use error::SeckillError;
pub use idgen::IdGenerator;
pub use inventory::{DeductRecord, DeductStatus, InventoryManager, SettleOutcome, TryOutcome};
pub use limiter::{RateDimension, RateLimiter};
pub use order::{Order, OrderStatus, OrderStore, OrderWorker};
pub use queue::OrderQueue;
pub use reconciler::StockReconciler;
pub use seckill::{OrderMessage, SaleRequest, SaleResult, SeckillEngine};
pub use store::{HotStore, MemoryStore};
pub use sweeper::ExpirySweeper;
