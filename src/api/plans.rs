//! Recurring-plan listing for feed configuration UIs.

use crate::api::AppState;
use crate::error::AppError;
use crate::gateway::types::GatewayName;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;

/// GET /plans/{gateway}
pub async fn list_plans(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
) -> Response {
    let gateway = match GatewayName::from_str(&gateway) {
        Ok(gateway) => gateway,
        Err(e) => return AppError::from(e).into_response(),
    };
    match state.plan_cache.get_plans(gateway).await {
        Ok(plans) => (StatusCode::OK, Json(json!({ "plans": plans }))).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

/// POST /plans/{gateway}/refresh: explicit cache invalidation, used when
/// gateway settings change.
pub async fn refresh_plans(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
) -> Response {
    let gateway = match GatewayName::from_str(&gateway) {
        Ok(gateway) => gateway,
        Err(e) => return AppError::from(e).into_response(),
    };
    state.plan_cache.invalidate(gateway).await;
    match state.plan_cache.get_plans(gateway).await {
        Ok(plans) => (StatusCode::OK, Json(json!({ "plans": plans }))).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}
