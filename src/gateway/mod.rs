//! HTTP gateway
//!
//! Thin axum surface over the engine: the sale endpoint, result
//! lookup, prewarm, and the admin stock reconcile operations.
//! Authentication is an external collaborator; the authenticated user
//! id arrives in the `x-user-id` header.

mod handlers;
mod response;
mod state;

pub use response::{ApiError, ApiResponse, ApiResult};
pub use state::AppState;

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Build the full router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/seckill/do", post(handlers::seckill::do_sale))
        .route("/seckill/result", get(handlers::seckill::query_result))
        .route(
            "/seckill/prewarm/{activity_id}",
            post(handlers::seckill::prewarm),
        )
        .route("/stock/sync/redis/{id}", post(handlers::stock::sync_to_hot))
        .route(
            "/stock/sync/mysql/{id}",
            post(handlers::stock::sync_to_durable),
        )
        .route(
            "/stock/consistency/{id}",
            get(handlers::stock::check_consistency).post(handlers::stock::check_consistency),
        )
        .route("/stock/repair/{id}", post(handlers::stock::repair))
        .route("/health", get(handlers::health))
        .with_state(state)
}
