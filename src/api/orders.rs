//! Administrative order actions: refund and subscription cancellation.

use crate::api::AppState;
use crate::database::order_store::{NewPaymentRecord, PaymentRecordKind, TransitionResult};
use crate::error::AppError;
use crate::gateway::error::GatewayError;
use crate::gateway::types::{GatewayName, Money};
use crate::reconcile::state::PaymentStatus;
use crate::services::notification::OrderNotification;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct RefundPayload {
    /// Partial refund amount; omitted means full refund.
    #[serde(default)]
    pub amount: Option<Money>,
}

/// POST /orders/{order_id}/refund
///
/// Refunds the order's most recent transaction. An unsettled transaction
/// cannot be refunded, so a non-retryable refusal falls back to a void.
pub async fn refund_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<RefundPayload>>,
) -> Response {
    let order = match state.store.get(order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => return AppError::new(crate::error::AppErrorKind::OrderNotFound).into_response(),
        Err(e) => return AppError::from(e).into_response(),
    };
    let Some(transaction_id) = order.transaction_id.clone() else {
        return AppError::validation("order has no transaction to refund").into_response();
    };
    let gateway = match GatewayName::from_str(&order.gateway) {
        Ok(gateway) => gateway,
        Err(e) => return AppError::from(e).into_response(),
    };
    let client = match state.gateways.get_gateway(gateway) {
        Ok(client) => client,
        Err(e) => return AppError::from(e).into_response(),
    };

    let amount = payload.and_then(|Json(p)| p.amount);
    let refunded = match client.refund(&transaction_id, amount.clone()).await {
        Ok(refunded) => refunded,
        Err(e @ GatewayError::ApiError {
            retryable: false, ..
        }) => {
            // Not yet settled; void instead.
            warn!(order_id = %order_id, error = %e, "refund refused, attempting void");
            match client.void(&transaction_id).await {
                Ok(voided) => voided,
                Err(e) => return AppError::from(e).into_response(),
            }
        }
        Err(e) => return AppError::from(e).into_response(),
    };

    info!(
        order_id = %order_id,
        transaction_id = %transaction_id,
        refund_id = %refunded.refund_id,
        "transaction refunded"
    );
    if let Err(e) = state
        .store
        .append_payment_record(NewPaymentRecord {
            order_id,
            kind: PaymentRecordKind::Refund,
            reference: refunded.refund_id.clone(),
            amount,
            note: None,
        })
        .await
    {
        return AppError::from(e).into_response();
    }
    if let Err(e) = state
        .store
        .record_note(
            order_id,
            &format!(
                "Transaction {} refunded ({}).",
                transaction_id, refunded.refund_id
            ),
        )
        .await
    {
        return AppError::from(e).into_response();
    }

    (
        StatusCode::OK,
        Json(json!({ "refund_id": refunded.refund_id, "status": refunded.status })),
    )
        .into_response()
}

/// POST /orders/{order_id}/cancel
///
/// Requests cancellation at the gateway and applies the local transition.
/// The gateway's own cancellation webhook, delivered later, lands as an
/// idempotent no-op.
pub async fn cancel_order_subscription(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Response {
    let order = match state.store.get(order_id).await {
        Ok(Some(order)) => order,
        Ok(None) => return AppError::new(crate::error::AppErrorKind::OrderNotFound).into_response(),
        Err(e) => return AppError::from(e).into_response(),
    };
    let Some(subscription_id) = order.subscription_id.clone() else {
        return AppError::validation("order has no subscription to cancel").into_response();
    };
    let gateway = match GatewayName::from_str(&order.gateway) {
        Ok(gateway) => gateway,
        Err(e) => return AppError::from(e).into_response(),
    };
    let client = match state.gateways.get_gateway(gateway) {
        Ok(client) => client,
        Err(e) => return AppError::from(e).into_response(),
    };

    if let Err(e) = client.cancel_subscription(&subscription_id).await {
        return AppError::from(e).into_response();
    }

    let status = match state
        .store
        .transition(
            order_id,
            PaymentStatus::Active,
            PaymentStatus::Cancelled,
            Default::default(),
        )
        .await
    {
        Ok(TransitionResult::Updated(updated)) => {
            state
                .hooks
                .dispatch(OrderNotification::SubscriptionCanceled {
                    order_id,
                    subscription_id: subscription_id.clone(),
                })
                .await;
            updated.payment_status
        }
        Ok(TransitionResult::Conflict { current }) => {
            warn!(
                order_id = %order_id,
                observed = %current.map(|s| s.as_str()).unwrap_or("missing"),
                "order was not active at cancellation time"
            );
            current.unwrap_or(order.payment_status)
        }
        Err(e) => return AppError::from(e).into_response(),
    };
    if let Err(e) = state
        .store
        .record_note(
            order_id,
            &format!("Subscription {} canceled by request.", subscription_id),
        )
        .await
    {
        return AppError::from(e).into_response();
    }

    info!(order_id = %order_id, subscription_id = %subscription_id, "subscription cancellation requested");
    (
        StatusCode::OK,
        Json(json!({ "payment_status": status })),
    )
        .into_response()
}
