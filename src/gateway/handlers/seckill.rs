//! Sale endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::Deserialize;

use crate::core_types::{ActivityId, UserId};
use crate::error::SeckillError;
use crate::seckill::{SaleRequest, SaleResult};

use super::super::response::{ApiError, ApiResult, ok};
use super::super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DoSaleBody {
    pub request_id: String,
    pub activity_id: ActivityId,
    pub quantity: i64,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub request_id: String,
}

fn user_id_from(headers: &HeaderMap) -> Result<UserId, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::unauthorized("missing or invalid x-user-id"))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Create order endpoint
///
/// POST /seckill/do
pub async fn do_sale(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<DoSaleBody>,
) -> ApiResult<SaleResult> {
    let user_id = user_id_from(&headers)?;
    let ip = header_str(&headers, "x-forwarded-for")
        .map(|v| v.split(',').next().unwrap_or("").trim().to_string())
        .unwrap_or_default();

    let request = SaleRequest {
        request_id: body.request_id,
        activity_id: body.activity_id,
        user_id,
        quantity: body.quantity,
        ip,
        device_id: body.device_id,
        user_agent: header_str(&headers, "user-agent"),
        vip: header_str(&headers, "x-user-vip").as_deref() == Some("1"),
    };

    // The hot path gets a hard budget; a timed-out attempt reads as a
    // retriable system error and is never memoized
    let result = tokio::time::timeout(state.seckill_timeout, state.engine.do_sale(&request)).await;
    match result {
        Ok(result) => ok(result),
        Err(_) => Err(SeckillError::Internal("seckill timeout".to_string()).into()),
    }
}

/// Resolve a memoized sale result
///
/// GET /seckill/result?request_id=...
pub async fn query_result(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ResultQuery>,
) -> ApiResult<SaleResult> {
    let user_id = user_id_from(&headers)?;
    let result = state
        .engine
        .query_result(&query.request_id, user_id)
        .await?;
    ok(result)
}

/// Load an activity into the hot store (admin)
///
/// POST /seckill/prewarm/{activity_id}
pub async fn prewarm(
    State(state): State<Arc<AppState>>,
    Path(activity_id): Path<ActivityId>,
) -> ApiResult<ActivityId> {
    state.engine.prewarm(activity_id).await?;
    ok(activity_id)
}
