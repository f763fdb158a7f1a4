//! Request handlers

pub mod seckill;
pub mod stock;

use super::response::{ApiResult, ok};
use super::state::AppState;
use axum::extract::State;
use std::sync::Arc;

/// Liveness probe
pub async fn health(State(_state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    ok("up")
}
