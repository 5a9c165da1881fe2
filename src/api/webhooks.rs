//! Webhook ingress.
//!
//! Transport acknowledgment is decoupled from business outcome: benign
//! no-ops (no correlation, foreign events, refused transitions) are 2xx so
//! the gateway stops redelivering, while transient failures answer 5xx to
//! request redelivery. Authenticity is checked before any parsing.

use crate::api::AppState;
use crate::error::AppError;
use crate::gateway::error::GatewayError;
use crate::gateway::types::GatewayName;
use crate::reconcile::engine::WebhookDisposition;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// POST /webhooks/{gateway}
pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(gateway) = GatewayName::from_str(&gateway) else {
        warn!(gateway = %gateway, "webhook for unknown gateway");
        return (StatusCode::NOT_FOUND, "Unknown gateway").into_response();
    };
    info!(gateway = %gateway, "received webhook");

    let client = match state.gateways.get_gateway(gateway) {
        Ok(client) => client,
        Err(e) => {
            error!(gateway = %gateway, error = %e, "gateway unavailable for webhook");
            return AppError::from(e).into_response();
        }
    };

    // Stripe-style gateways carry the signature in a header; Braintree-style
    // envelopes carry it in the body itself.
    let signature = match gateway {
        GatewayName::Stripe => headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok()),
        GatewayName::Braintree => None,
    };

    let event = match client.verify_webhook(signature, &body) {
        Ok(event) => event,
        Err(e @ GatewayError::AuthenticityError { .. }) => {
            warn!(gateway = %gateway, error = %e, "webhook rejected: bad signature");
            return (StatusCode::UNAUTHORIZED, "Invalid signature").into_response();
        }
        Err(e @ GatewayError::MalformedEventError { .. }) => {
            warn!(gateway = %gateway, error = %e, "webhook rejected: malformed payload");
            return (StatusCode::BAD_REQUEST, "Invalid payload").into_response();
        }
        Err(e) => {
            error!(gateway = %gateway, error = %e, "webhook verification failed");
            return AppError::from(e).into_response();
        }
    };

    match state.engine.process_event(&event).await {
        Ok(WebhookDisposition::Applied { order_id, status }) => {
            info!(
                gateway = %gateway,
                event_id = %event.event_id,
                order_id = %order_id,
                status = %status,
                "webhook applied"
            );
            (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
        }
        Ok(WebhookDisposition::Acknowledged { reason }) => {
            info!(
                gateway = %gateway,
                event_id = %event.event_id,
                reason = ?reason,
                "webhook acknowledged without changes"
            );
            (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
        }
        // Transient failure: answer 5xx so the gateway redelivers.
        Err(e) => {
            error!(
                gateway = %gateway,
                event_id = %event.event_id,
                error = %e,
                "webhook processing failed, requesting redelivery"
            );
            AppError::from(e).into_response()
        }
    }
}

/// GET /webhooks/{gateway}: gateway endpoint-verification probe.
pub async fn handle_challenge(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Ok(gateway) = GatewayName::from_str(&gateway) else {
        return (StatusCode::NOT_FOUND, "Unknown gateway").into_response();
    };
    let Some(challenge) = params
        .get("bt_challenge")
        .or_else(|| params.get("challenge"))
    else {
        return (StatusCode::BAD_REQUEST, "Missing challenge").into_response();
    };

    let client = match state.gateways.get_gateway(gateway) {
        Ok(client) => client,
        Err(e) => return AppError::from(e).into_response(),
    };
    match client.verify_challenge(challenge) {
        Ok(answer) => (StatusCode::OK, answer).into_response(),
        Err(e) => {
            warn!(gateway = %gateway, error = %e, "challenge verification failed");
            (StatusCode::BAD_REQUEST, "Invalid challenge").into_response()
        }
    }
}
