//! The synchronous checkout path.
//!
//! Processes a form submission: creates the order record, issues the charge
//! or subscription-creation call with the order id embedded in gateway-side
//! metadata, and settles the order to `Paid`/`Active`/`Failed`. Every
//! failing path leaves the order `Failed` with a specific recorded reason;
//! the submitter only ever sees a generic message.

use crate::database::error::DatabaseError;
use crate::database::order_store::{
    NewOrder, NewPaymentRecord, Order, OrderPatch, OrderStore, PaymentRecordKind, TransitionResult,
};
use crate::gateway::client::GatewayClient;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::factory::GatewayFactory;
use crate::gateway::types::{
    BillingAddress, ChargeRequest, CustomerDetails, DeclineDetail, GatewayName, Money,
    SubscriptionRequest,
};
use crate::reconcile::state::PaymentStatus;
use crate::services::customer_vault::CustomerVault;
use crate::services::notification::{HookDispatcher, OrderNotification};
use crate::services::plan_cache::PlanCache;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shown to the submitter on any failure; diagnostic detail goes to the log
/// sink and the order record only.
pub const GENERIC_FAILURE_MESSAGE: &str = "Payment could not be completed. Please try again.";

const CVV_INVALID_MESSAGE: &str = "Security code (CVV) is invalid.";
const POSTAL_INVALID_MESSAGE: &str = "Postal code is required or invalid.";
const FALLBACK_DECLINE_MESSAGE: &str = "Payment failed.";

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("store error: {0}")]
    Store(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Product,
    Subscription,
}

/// Where the plan id came from: a fixed feed setting, or a value sourced
/// from the submitted form data (dynamic plan).
#[derive(Debug, Clone)]
pub enum PlanSelection {
    Fixed(String),
    FromForm(String),
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub gateway: GatewayName,
    pub kind: TransactionKind,
    pub amount: Money,
    /// Single-use token produced by client-side tokenization; never raw
    /// card data.
    pub payment_method_token: String,
    pub customer: CustomerDetails,
    pub billing: Option<BillingAddress>,
    pub device_data: Option<String>,
    pub plan: Option<PlanSelection>,
}

#[derive(Debug, Clone)]
pub struct CheckoutOutcome {
    pub order: Order,
    /// Present only on failure; always the generic message.
    pub user_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    pub vault_enabled: bool,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            vault_enabled: true,
        }
    }
}

/// Seam over gateway construction so the processor can be exercised without
/// live credentials.
pub trait GatewayProvider: Send + Sync {
    fn get(&self, gateway: GatewayName) -> GatewayResult<Box<dyn GatewayClient>>;
}

impl GatewayProvider for GatewayFactory {
    fn get(&self, gateway: GatewayName) -> GatewayResult<Box<dyn GatewayClient>> {
        self.get_gateway(gateway)
    }
}

pub struct CheckoutService {
    store: Arc<dyn OrderStore>,
    gateways: Arc<dyn GatewayProvider>,
    plan_cache: Arc<PlanCache>,
    vault: Arc<CustomerVault>,
    hooks: Arc<HookDispatcher>,
    config: CheckoutConfig,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateways: Arc<dyn GatewayProvider>,
        plan_cache: Arc<PlanCache>,
        vault: Arc<CustomerVault>,
        hooks: Arc<HookDispatcher>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            plan_cache,
            vault,
            hooks,
            config,
        }
    }

    pub async fn process(&self, request: CheckoutRequest) -> Result<CheckoutOutcome, CheckoutError> {
        let order_id = Uuid::new_v4();
        // The plan reference is resolved once, at creation time, and never
        // re-read from mutable submission data afterwards.
        let plan_ref = resolve_plan_selection(request.plan.as_ref());
        let order = self
            .store
            .create(NewOrder {
                order_id,
                gateway: request.gateway,
                amount: Some(request.amount.clone()),
                plan_ref: plan_ref.clone(),
            })
            .await?;

        info!(
            order_id = %order_id,
            gateway = %request.gateway,
            kind = ?request.kind,
            "checkout started"
        );

        match request.kind {
            TransactionKind::Product => self.process_one_time(order, request).await,
            TransactionKind::Subscription => {
                self.process_subscription(order, request, plan_ref).await
            }
        }
    }

    async fn process_one_time(
        &self,
        order: Order,
        request: CheckoutRequest,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if request.payment_method_token.trim().is_empty() {
            return self.fail(order, "Payment method token missing.").await;
        }
        if let Err(e) = request.amount.validate_positive("amount") {
            return self.fail(order, &e.user_message()).await;
        }
        let gateway = match self.gateways.get(request.gateway) {
            Ok(gateway) => gateway,
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "gateway unavailable");
                return self.fail(order, "Gateway not configured.").await;
            }
        };

        let charge = gateway
            .create_charge(ChargeRequest {
                order_id: order.order_id,
                amount: request.amount.clone(),
                payment_method_token: request.payment_method_token.clone(),
                customer: request.customer.clone(),
                billing: request.billing.clone(),
                device_data: request.device_data.clone(),
            })
            .await;

        match charge {
            Ok(outcome) => {
                self.store
                    .append_payment_record(NewPaymentRecord {
                        order_id: order.order_id,
                        kind: PaymentRecordKind::InitialPayment,
                        reference: outcome.transaction_id.clone(),
                        amount: Some(outcome.amount.clone()),
                        note: None,
                    })
                    .await?;
                let patch = OrderPatch {
                    transaction_id: Some(outcome.transaction_id.clone()),
                    amount: Some(outcome.amount.clone()),
                    ..Default::default()
                };
                let updated = self
                    .settle(order, PaymentStatus::Paid, patch)
                    .await?;
                self.store
                    .record_note(
                        updated.order_id,
                        &format!(
                            "Payment of {} {} captured (transaction {}).",
                            outcome.amount.amount, outcome.amount.currency, outcome.transaction_id
                        ),
                    )
                    .await?;
                self.hooks
                    .dispatch(OrderNotification::PaymentCompleted {
                        order_id: updated.order_id,
                        transaction_id: outcome.transaction_id,
                        amount: outcome.amount,
                    })
                    .await;
                Ok(CheckoutOutcome {
                    order: updated,
                    user_message: None,
                })
            }
            Err(GatewayError::DeclinedError { message, details }) => {
                let reason = human_readable_decline(&details, &message);
                self.fail(order, &reason).await
            }
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "charge call failed");
                self.fail(order, &e.user_message()).await
            }
        }
    }

    async fn process_subscription(
        &self,
        order: Order,
        request: CheckoutRequest,
        plan_ref: Option<String>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        if request.payment_method_token.trim().is_empty() {
            return self
                .fail(order, "Subscription payment token missing.")
                .await;
        }
        let Some(plan_id) = plan_ref else {
            return self.fail(order, "Subscription plan not resolved.").await;
        };
        match self
            .plan_cache
            .is_valid_plan(request.gateway, &plan_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let reason = format!("Subscription plan '{}' is not available.", plan_id);
                return self.fail(order, &reason).await;
            }
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "plan lookup failed");
                return self.fail(order, &e.user_message()).await;
            }
        }
        let gateway = match self.gateways.get(request.gateway) {
            Ok(gateway) => gateway,
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "gateway unavailable");
                return self.fail(order, "Gateway not configured.").await;
            }
        };

        let (customer_ref, vaulted_token) = match self
            .resolve_customer(&order, gateway.as_ref(), &request)
            .await
        {
            Ok(resolved) => resolved,
            Err(reason) => return self.fail(order, &reason).await,
        };
        let Some(payment_method_token) = vaulted_token else {
            return self.fail(order, "Payment method token missing.").await;
        };

        let created = gateway
            .create_subscription(SubscriptionRequest {
                order_id: order.order_id,
                plan_id: plan_id.clone(),
                payment_method_token,
                customer_ref: Some(customer_ref.clone()),
            })
            .await;

        match created {
            Ok(outcome) => {
                self.store
                    .set_subscription_id(order.order_id, &outcome.subscription_id)
                    .await?;
                if let Some(txn) = &outcome.first_transaction {
                    self.store
                        .append_payment_record(NewPaymentRecord {
                            order_id: order.order_id,
                            kind: PaymentRecordKind::InitialPayment,
                            reference: txn.transaction_id.clone(),
                            amount: Some(txn.amount.clone()),
                            note: None,
                        })
                        .await?;
                }
                let transaction_id = outcome
                    .first_transaction
                    .as_ref()
                    .map(|t| t.transaction_id.clone())
                    .unwrap_or_else(|| outcome.subscription_id.clone());
                let amount = outcome
                    .first_transaction
                    .as_ref()
                    .map(|t| t.amount.clone())
                    .unwrap_or_else(|| request.amount.clone());
                let patch = OrderPatch {
                    transaction_id: Some(transaction_id),
                    amount: Some(amount),
                    customer_ref: Some(customer_ref),
                    ..Default::default()
                };
                let updated = self.settle(order, PaymentStatus::Active, patch).await?;
                self.store
                    .record_note(
                        updated.order_id,
                        &format!(
                            "Subscription {} started on plan '{}'.",
                            outcome.subscription_id, plan_id
                        ),
                    )
                    .await?;
                self.hooks
                    .dispatch(OrderNotification::SubscriptionStarted {
                        order_id: updated.order_id,
                        subscription_id: outcome.subscription_id,
                    })
                    .await;
                Ok(CheckoutOutcome {
                    order: updated,
                    user_message: None,
                })
            }
            Err(GatewayError::DeclinedError { message, details }) => {
                let reason = human_readable_decline(&details, &message);
                self.fail(order, &reason).await
            }
            Err(e) => {
                error!(order_id = %order.order_id, error = %e, "subscription call failed");
                self.fail(order, &e.user_message()).await
            }
        }
    }

    /// Resolve (and when needed create) the gateway-side customer profile
    /// the subscription will bill against. Returns a failure reason string
    /// for the order record on any unrecoverable step.
    async fn resolve_customer(
        &self,
        order: &Order,
        gateway: &dyn GatewayClient,
        request: &CheckoutRequest,
    ) -> Result<(String, Option<String>), String> {
        let email = request
            .customer
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());

        if self.config.vault_enabled {
            if let Some(email) = email {
                let existing = match self.vault.lookup(request.gateway, email).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(order_id = %order.order_id, error = %e, "vault lookup failed, creating fresh customer");
                        None
                    }
                };
                if let Some(customer_ref) = existing {
                    return match gateway
                        .attach_payment_method(&customer_ref, &request.payment_method_token)
                        .await
                    {
                        Ok(token) => Ok((customer_ref, Some(token))),
                        Err(e) => {
                            error!(order_id = %order.order_id, error = %e, "payment method attach failed");
                            Err("Unable to attach payment method.".to_string())
                        }
                    };
                }
            }
        }

        let profile = gateway
            .create_customer(
                &request.customer,
                &request.payment_method_token,
                request.billing.as_ref(),
            )
            .await
            .map_err(|e| {
                error!(order_id = %order.order_id, error = %e, "customer creation failed");
                "Unable to create customer.".to_string()
            })?;

        if self.config.vault_enabled {
            if let Some(email) = email {
                if let Err(e) = self
                    .vault
                    .remember(request.gateway, email, &profile.customer_ref)
                    .await
                {
                    warn!(order_id = %order.order_id, error = %e, "vault save failed");
                }
            }
        }

        Ok((profile.customer_ref, profile.payment_method_token))
    }

    /// Conditional flip out of `Processing`. Losing the race means a
    /// webhook settled the order first; the current record wins.
    async fn settle(
        &self,
        order: Order,
        next: PaymentStatus,
        patch: OrderPatch,
    ) -> Result<Order, CheckoutError> {
        match self
            .store
            .transition(order.order_id, PaymentStatus::Processing, next, patch)
            .await?
        {
            TransitionResult::Updated(updated) => Ok(updated),
            TransitionResult::Conflict { current } => {
                warn!(
                    order_id = %order.order_id,
                    observed = %current.map(|s| s.as_str()).unwrap_or("missing"),
                    "order settled concurrently"
                );
                Ok(self.store.get(order.order_id).await?.unwrap_or(order))
            }
        }
    }

    async fn fail(&self, order: Order, reason: &str) -> Result<CheckoutOutcome, CheckoutError> {
        warn!(order_id = %order.order_id, reason = %reason, "checkout failed");
        let patch = OrderPatch {
            failure_reason: Some(reason.to_string()),
            ..Default::default()
        };
        let updated = self.settle(order, PaymentStatus::Failed, patch).await?;
        self.store
            .record_note(updated.order_id, &format!("Payment failed: {}", reason))
            .await?;
        self.hooks
            .dispatch(OrderNotification::PaymentFailed {
                order_id: updated.order_id,
                reason: reason.to_string(),
            })
            .await;
        Ok(CheckoutOutcome {
            order: updated,
            user_message: Some(GENERIC_FAILURE_MESSAGE.to_string()),
        })
    }
}

fn resolve_plan_selection(plan: Option<&PlanSelection>) -> Option<String> {
    let raw = match plan {
        Some(PlanSelection::Fixed(value)) | Some(PlanSelection::FromForm(value)) => value,
        None => return None,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Build the recorded failure reason from the gateway's structured error
/// list: postal-code and CVV failures map to field-specific messages, the
/// rest fall back to the gateway's own text, deduplicated.
pub fn human_readable_decline(details: &[DeclineDetail], fallback: &str) -> String {
    let mut messages: Vec<String> = Vec::new();
    for detail in details {
        let lowered_message = detail.message.to_lowercase();
        let lowered_attr = detail
            .attribute
            .as_deref()
            .unwrap_or("")
            .to_lowercase();
        let lowered_code = detail.code.to_lowercase();

        let mapped = if lowered_message.contains("cvv")
            || lowered_message.contains("security code")
            || lowered_attr.contains("cvv")
            || matches!(lowered_code.as_str(), "81706" | "81707" | "81736" | "incorrect_cvc" | "invalid_cvc")
        {
            CVV_INVALID_MESSAGE.to_string()
        } else if lowered_message.contains("postal code")
            || lowered_message.contains("zip")
            || lowered_attr.contains("postal")
            || matches!(lowered_code.as_str(), "81801" | "81808" | "81813" | "incorrect_zip")
        {
            POSTAL_INVALID_MESSAGE.to_string()
        } else {
            detail.message.trim().to_string()
        };
        if !mapped.is_empty() && !messages.contains(&mapped) {
            messages.push(mapped);
        }
    }

    if messages.is_empty() {
        let fallback = fallback.trim();
        if fallback.is_empty() {
            return FALLBACK_DECLINE_MESSAGE.to_string();
        }
        return fallback.to_string();
    }
    messages.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(code: &str, message: &str, attribute: Option<&str>) -> DeclineDetail {
        DeclineDetail {
            code: code.to_string(),
            message: message.to_string(),
            attribute: attribute.map(String::from),
        }
    }

    #[test]
    fn cvv_codes_map_to_field_specific_message() {
        let reason = human_readable_decline(
            &[detail("81706", "CVV is required.", Some("cvv"))],
            "Gateway Rejected: cvv",
        );
        assert_eq!(reason, CVV_INVALID_MESSAGE);

        let reason = human_readable_decline(
            &[detail("incorrect_cvc", "Your card's security code is incorrect.", None)],
            "",
        );
        assert_eq!(reason, CVV_INVALID_MESSAGE);
    }

    #[test]
    fn postal_code_errors_map_to_field_specific_message() {
        let reason = human_readable_decline(
            &[detail("81813", "Postal code can only contain letters, numbers, spaces, and hyphens.", Some("postal_code"))],
            "",
        );
        assert_eq!(reason, POSTAL_INVALID_MESSAGE);
    }

    #[test]
    fn duplicate_messages_are_deduplicated() {
        let reason = human_readable_decline(
            &[
                detail("81706", "CVV is required.", Some("cvv")),
                detail("81736", "CVV verification failed.", Some("cvv")),
                detail("2001", "Insufficient Funds", None),
            ],
            "",
        );
        assert_eq!(
            reason,
            format!("{} Insufficient Funds", CVV_INVALID_MESSAGE)
        );
    }

    #[test]
    fn empty_details_fall_back_to_gateway_message() {
        assert_eq!(
            human_readable_decline(&[], "Processor Declined"),
            "Processor Declined"
        );
        assert_eq!(human_readable_decline(&[], "  "), FALLBACK_DECLINE_MESSAGE);
    }

    #[test]
    fn plan_selection_resolves_and_trims() {
        assert_eq!(
            resolve_plan_selection(Some(&PlanSelection::Fixed(" gold-plan ".to_string()))),
            Some("gold-plan".to_string())
        );
        assert_eq!(
            resolve_plan_selection(Some(&PlanSelection::FromForm("".to_string()))),
            None
        );
        assert_eq!(resolve_plan_selection(None), None);
    }
}
