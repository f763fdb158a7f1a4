//! Admin stock reconcile endpoints

use std::sync::Arc;

use axum::extract::{Path, State};

use crate::core_types::ActivityId;
use crate::reconciler::ConsistencyReport;

use super::super::response::{ApiResult, ok};
use super::super::state::AppState;

/// POST /stock/sync/redis/{id}
pub async fn sync_to_hot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ActivityId>,
) -> ApiResult<ActivityId> {
    state.reconciler.sync_to_hot(id).await?;
    ok(id)
}

/// POST /stock/sync/mysql/{id}
pub async fn sync_to_durable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ActivityId>,
) -> ApiResult<ActivityId> {
    state.reconciler.sync_to_durable(id).await?;
    ok(id)
}

/// GET|POST /stock/consistency/{id}
pub async fn check_consistency(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ActivityId>,
) -> ApiResult<ConsistencyReport> {
    let report = state.reconciler.check_consistency(id).await?;
    ok(report)
}

/// POST /stock/repair/{id}
pub async fn repair(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ActivityId>,
) -> ApiResult<ConsistencyReport> {
    let report = state.reconciler.repair(id).await?;
    ok(report)
}
