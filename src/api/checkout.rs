//! Synchronous checkout endpoints.

use crate::api::AppState;
use crate::error::AppError;
use crate::gateway::types::{BillingAddress, CustomerDetails, GatewayName, Money};
use crate::reconcile::state::PaymentStatus;
use crate::services::checkout::{CheckoutRequest, PlanSelection, TransactionKind};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CheckoutPayload {
    pub gateway: String,
    /// "product" or "subscription".
    pub transaction_type: String,
    pub amount: Money,
    pub payment_method_token: String,
    #[serde(default)]
    pub customer: Option<CustomerDetails>,
    #[serde(default)]
    pub billing: Option<BillingAddress>,
    #[serde(default)]
    pub device_data: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    /// "fixed" (feed setting) or "field" (sourced from form data).
    #[serde(default)]
    pub plan_source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckoutPayload {
    fn into_request(self) -> Result<CheckoutRequest, AppError> {
        let gateway = GatewayName::from_str(&self.gateway).map_err(AppError::from)?;
        let kind = match self.transaction_type.trim().to_lowercase().as_str() {
            "subscription" => TransactionKind::Subscription,
            "product" | "" => TransactionKind::Product,
            other => {
                return Err(AppError::validation(format!(
                    "unsupported transaction type: {}",
                    other
                )))
            }
        };
        let plan = self.plan_id.map(|plan_id| {
            match self.plan_source.as_deref() {
                Some("field") => PlanSelection::FromForm(plan_id),
                _ => PlanSelection::Fixed(plan_id),
            }
        });

        Ok(CheckoutRequest {
            gateway,
            kind,
            amount: self.amount,
            payment_method_token: self.payment_method_token,
            customer: self.customer.unwrap_or_default(),
            billing: self.billing,
            device_data: self.device_data,
            plan,
        })
    }
}

/// POST /checkout
pub async fn handle_checkout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckoutPayload>,
) -> Response {
    let request = match payload.into_request() {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    // The gateway call must run to completion even if the submitter
    // disconnects; an abandoned connection never aborts a charge.
    let service = state.checkout.clone();
    let processed = tokio::spawn(async move { service.process(request).await });

    match processed.await {
        Ok(Ok(outcome)) => {
            let response = CheckoutResponse {
                order_id: outcome.order.order_id,
                payment_status: outcome.order.payment_status,
                transaction_id: outcome.order.transaction_id.clone(),
                subscription_id: outcome.order.subscription_id.clone(),
                message: outcome.user_message,
            };
            let status = if outcome.order.payment_status == PaymentStatus::Failed {
                StatusCode::PAYMENT_REQUIRED
            } else {
                StatusCode::OK
            };
            (status, Json(response)).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "checkout processing failed");
            AppError::from(match e {
                crate::services::checkout::CheckoutError::Store(db) => db,
            })
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "checkout task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

/// GET /checkout/token/{gateway}: token for the client-side tokenization UI.
pub async fn handle_client_token(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
) -> Response {
    let gateway = match GatewayName::from_str(&gateway) {
        Ok(gateway) => gateway,
        Err(e) => return AppError::from(e).into_response(),
    };
    let client = match state.gateways.get_gateway(gateway) {
        Ok(client) => client,
        Err(e) => return AppError::from(e).into_response(),
    };
    match client.generate_client_token().await {
        Ok(token) => (StatusCode::OK, Json(json!({ "client_token": token }))).into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}
