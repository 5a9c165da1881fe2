//! HTTP surface: webhook ingress, checkout, plan listing, health.

pub mod checkout;
pub mod orders;
pub mod plans;
pub mod webhooks;

use crate::database::order_store::OrderStore;
use crate::error::{AppError, ErrorCode};
use crate::gateway::factory::GatewayFactory;
use crate::reconcile::engine::ReconciliationEngine;
use crate::services::checkout::CheckoutService;
use crate::services::notification::HookDispatcher;
use crate::services::plan_cache::PlanCache;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;

pub struct AppState {
    pub pool: PgPool,
    pub store: Arc<dyn OrderStore>,
    pub engine: Arc<ReconciliationEngine>,
    pub checkout: Arc<CheckoutService>,
    pub plan_cache: Arc<PlanCache>,
    pub gateways: Arc<GatewayFactory>,
    pub hooks: Arc<HookDispatcher>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/webhooks/{gateway}",
            post(webhooks::handle_webhook).get(webhooks::handle_challenge),
        )
        .route("/checkout", post(checkout::handle_checkout))
        .route(
            "/checkout/token/{gateway}",
            get(checkout::handle_client_token),
        )
        .route("/plans/{gateway}", get(plans::list_plans))
        .route("/plans/{gateway}/refresh", post(plans::refresh_plans))
        .route("/orders/{order_id}/refund", post(orders::refund_order))
        .route(
            "/orders/{order_id}/cancel",
            post(orders::cancel_order_subscription),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let health = crate::health::check_health(&state.pool).await;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health)).into_response()
}

/// Standardized error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            timestamp: Utc::now().to_rfc3339(),
            retryable: Some(error.is_retryable()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from_app_error(&self))).into_response()
    }
}
