//! Checkout scenarios over an in-memory store and a scripted gateway.

use crate::database::memory::{MemoryCustomerVaultStore, MemoryOrderStore};
use crate::gateway::client::GatewayClient;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{
    BillingAddress, ChargeOutcome, ChargeRequest, CustomerDetails, CustomerProfile, DeclineDetail,
    GatewayEvent, GatewayName, Money, Plan, RefundOutcome, SubscriptionDetails,
    SubscriptionOutcome, SubscriptionRequest, TransactionSummary,
};
use crate::reconcile::state::PaymentStatus;
use crate::services::checkout::{
    CheckoutConfig, CheckoutRequest, CheckoutService, GatewayProvider, PlanSelection,
    TransactionKind, GENERIC_FAILURE_MESSAGE,
};
use crate::services::customer_vault::{CustomerVault, DEFAULT_VAULT_CACHE_TTL};
use crate::services::notification::{HookDispatcher, LoggingHook};
use crate::services::plan_cache::{PlanCache, PlanSource};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct ScriptedBehavior {
    decline_charge_with: Option<Vec<DeclineDetail>>,
    charge_calls: Mutex<Vec<ChargeRequest>>,
    subscription_calls: Mutex<Vec<SubscriptionRequest>>,
    attach_calls: Mutex<Vec<String>>,
    customer_calls: Mutex<u32>,
}

struct ScriptedGateway {
    behavior: Arc<ScriptedBehavior>,
}

#[async_trait]
impl GatewayClient for ScriptedGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Braintree
    }

    async fn generate_client_token(&self) -> GatewayResult<String> {
        Ok("client-token".to_string())
    }

    async fn create_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        self.behavior
            .charge_calls
            .lock()
            .expect("lock")
            .push(request.clone());
        if let Some(details) = &self.behavior.decline_charge_with {
            return Err(GatewayError::DeclinedError {
                message: "Processor declined".to_string(),
                details: details.clone(),
            });
        }
        Ok(ChargeOutcome {
            transaction_id: "txn_100".to_string(),
            status: "submitted_for_settlement".to_string(),
            amount: request.amount,
        })
    }

    async fn refund(
        &self,
        _transaction_id: &str,
        _amount: Option<Money>,
    ) -> GatewayResult<RefundOutcome> {
        Ok(RefundOutcome {
            refund_id: "ref_1".to_string(),
            status: "refunded".to_string(),
        })
    }

    async fn void(&self, _transaction_id: &str) -> GatewayResult<RefundOutcome> {
        Ok(RefundOutcome {
            refund_id: "void_1".to_string(),
            status: "voided".to_string(),
        })
    }

    async fn create_customer(
        &self,
        _customer: &CustomerDetails,
        payment_method_token: &str,
        _billing: Option<&BillingAddress>,
    ) -> GatewayResult<CustomerProfile> {
        *self.behavior.customer_calls.lock().expect("lock") += 1;
        Ok(CustomerProfile {
            customer_ref: "cust_1".to_string(),
            payment_method_token: Some(format!("vaulted-{}", payment_method_token)),
        })
    }

    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        payment_method_token: &str,
    ) -> GatewayResult<String> {
        self.behavior
            .attach_calls
            .lock()
            .expect("lock")
            .push(customer_ref.to_string());
        Ok(format!("vaulted-{}", payment_method_token))
    }

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> GatewayResult<SubscriptionOutcome> {
        self.behavior
            .subscription_calls
            .lock()
            .expect("lock")
            .push(request.clone());
        Ok(SubscriptionOutcome {
            subscription_id: "sub_100".to_string(),
            status: "Active".to_string(),
            first_transaction: Some(TransactionSummary {
                transaction_id: "txn_first".to_string(),
                amount: Money::new("25.00", "USD"),
            }),
        })
    }

    async fn cancel_subscription(&self, _subscription_id: &str) -> GatewayResult<()> {
        Ok(())
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> GatewayResult<SubscriptionDetails> {
        Ok(SubscriptionDetails {
            subscription_id: subscription_id.to_string(),
            status: "Active".to_string(),
            plan_id: None,
            order_ref: None,
        })
    }

    async fn fetch_plans(&self) -> GatewayResult<Vec<Plan>> {
        Ok(Vec::new())
    }

    fn verify_webhook(
        &self,
        _signature: Option<&str>,
        _body: &[u8],
    ) -> GatewayResult<GatewayEvent> {
        Err(GatewayError::MalformedEventError {
            message: "not scripted".to_string(),
        })
    }

    fn verify_challenge(&self, _challenge: &str) -> GatewayResult<String> {
        Ok("ok".to_string())
    }
}

struct ScriptedGateways {
    behavior: Arc<ScriptedBehavior>,
}

impl GatewayProvider for ScriptedGateways {
    fn get(&self, _gateway: GatewayName) -> GatewayResult<Box<dyn GatewayClient>> {
        Ok(Box::new(ScriptedGateway {
            behavior: self.behavior.clone(),
        }))
    }
}

struct StaticPlans;

#[async_trait]
impl PlanSource for StaticPlans {
    async fn fetch_plans(&self, _gateway: GatewayName) -> GatewayResult<Vec<Plan>> {
        Ok(vec![Plan {
            id: "gold-plan".to_string(),
            name: "Gold".to_string(),
            price: Money::new("25.00", "USD"),
            billing_frequency: Some("1-month".to_string()),
        }])
    }
}

struct Harness {
    store: Arc<MemoryOrderStore>,
    vault_store: Arc<MemoryCustomerVaultStore>,
    behavior: Arc<ScriptedBehavior>,
    service: CheckoutService,
}

fn harness(behavior: ScriptedBehavior) -> Harness {
    let store = Arc::new(MemoryOrderStore::default());
    let vault_store = Arc::new(MemoryCustomerVaultStore::default());
    let behavior = Arc::new(behavior);
    let service = CheckoutService::new(
        store.clone(),
        Arc::new(ScriptedGateways {
            behavior: behavior.clone(),
        }),
        Arc::new(PlanCache::new(
            Arc::new(StaticPlans),
            Duration::from_secs(60),
        )),
        Arc::new(CustomerVault::new(
            vault_store.clone(),
            DEFAULT_VAULT_CACHE_TTL,
        )),
        Arc::new(HookDispatcher::new().register(Arc::new(LoggingHook))),
        CheckoutConfig {
            vault_enabled: true,
        },
    );
    Harness {
        store,
        vault_store,
        behavior,
        service,
    }
}

fn product_request(token: &str) -> CheckoutRequest {
    CheckoutRequest {
        gateway: GatewayName::Braintree,
        kind: TransactionKind::Product,
        amount: Money::new("10.00", "USD"),
        payment_method_token: token.to_string(),
        customer: CustomerDetails {
            email: Some("buyer@example.com".to_string()),
            first_name: Some("Ada".to_string()),
            ..Default::default()
        },
        billing: None,
        device_data: None,
        plan: None,
    }
}

fn subscription_request(plan: &str) -> CheckoutRequest {
    CheckoutRequest {
        kind: TransactionKind::Subscription,
        plan: Some(PlanSelection::FromForm(plan.to_string())),
        amount: Money::new("25.00", "USD"),
        ..product_request("nonce-1")
    }
}

#[tokio::test]
async fn successful_charge_reaches_paid_with_transaction_id() {
    let h = harness(ScriptedBehavior::default());
    let outcome = h
        .service
        .process(product_request("nonce-1"))
        .await
        .expect("process");

    assert_eq!(outcome.order.payment_status, PaymentStatus::Paid);
    assert_eq!(outcome.order.transaction_id.as_deref(), Some("txn_100"));
    assert_eq!(outcome.order.amount.as_deref(), Some("10.00"));
    assert!(outcome.user_message.is_none());

    // the charge carried the order id for webhook correlation
    let calls = h.behavior.charge_calls.lock().expect("lock");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].order_id, outcome.order.order_id);
}

#[tokio::test]
async fn cvv_decline_reaches_failed_with_cvv_message() {
    let h = harness(ScriptedBehavior {
        decline_charge_with: Some(vec![DeclineDetail {
            code: "81736".to_string(),
            message: "CVV verification failed.".to_string(),
            attribute: Some("cvv".to_string()),
        }]),
        ..Default::default()
    });

    let outcome = h
        .service
        .process(product_request("nonce-1"))
        .await
        .expect("process");

    assert_eq!(outcome.order.payment_status, PaymentStatus::Failed);
    assert!(outcome
        .order
        .failure_reason
        .as_deref()
        .expect("failure reason")
        .contains("CVV"));
    assert_eq!(outcome.user_message.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
}

#[tokio::test]
async fn missing_token_fails_without_touching_gateway() {
    let h = harness(ScriptedBehavior::default());
    let outcome = h
        .service
        .process(product_request("  "))
        .await
        .expect("process");

    assert_eq!(outcome.order.payment_status, PaymentStatus::Failed);
    assert!(h.behavior.charge_calls.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn subscription_happy_path_reaches_active() {
    let h = harness(ScriptedBehavior::default());
    let outcome = h
        .service
        .process(subscription_request("gold-plan"))
        .await
        .expect("process");

    assert_eq!(outcome.order.payment_status, PaymentStatus::Active);
    assert_eq!(outcome.order.subscription_id.as_deref(), Some("sub_100"));
    assert_eq!(outcome.order.transaction_id.as_deref(), Some("txn_first"));
    assert_eq!(outcome.order.plan_ref.as_deref(), Some("gold-plan"));
    assert_eq!(outcome.order.customer_ref.as_deref(), Some("cust_1"));

    // createSubscription was called with the resolved plan and the order id
    // embedded for later correlation.
    let calls = h.behavior.subscription_calls.lock().expect("lock");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].plan_id, "gold-plan");
    assert_eq!(calls[0].order_id, outcome.order.order_id);

    // first invoice landed in the payment history
    assert_eq!(h.store.record_count(), 1);
}

#[tokio::test]
async fn unknown_plan_fails_with_specific_reason() {
    let h = harness(ScriptedBehavior::default());
    let outcome = h
        .service
        .process(subscription_request("bronze-plan"))
        .await
        .expect("process");

    assert_eq!(outcome.order.payment_status, PaymentStatus::Failed);
    assert!(outcome
        .order
        .failure_reason
        .as_deref()
        .expect("failure reason")
        .contains("bronze-plan"));
    assert!(h
        .behavior
        .subscription_calls
        .lock()
        .expect("lock")
        .is_empty());
}

#[tokio::test]
async fn missing_plan_fails_with_specific_reason() {
    let h = harness(ScriptedBehavior::default());
    let mut request = subscription_request("gold-plan");
    request.plan = None;

    let outcome = h.service.process(request).await.expect("process");
    assert_eq!(outcome.order.payment_status, PaymentStatus::Failed);
    assert_eq!(
        outcome.order.failure_reason.as_deref(),
        Some("Subscription plan not resolved.")
    );
}

#[tokio::test]
async fn vaulted_customer_is_reused_on_repeat_subscription() {
    let h = harness(ScriptedBehavior::default());

    // First subscription creates the gateway customer and vaults it.
    h.service
        .process(subscription_request("gold-plan"))
        .await
        .expect("first");
    assert_eq!(*h.behavior.customer_calls.lock().expect("lock"), 1);
    assert_eq!(h.vault_store.entries.lock().expect("lock").len(), 1);

    // Second subscription for the same email attaches to the existing
    // customer instead of creating another.
    h.service
        .process(subscription_request("gold-plan"))
        .await
        .expect("second");
    assert_eq!(*h.behavior.customer_calls.lock().expect("lock"), 1);
    let attaches = h.behavior.attach_calls.lock().expect("lock");
    assert_eq!(attaches.as_slice(), ["cust_1"]);
}

#[tokio::test]
async fn order_id_is_unique_per_submission() {
    let h = harness(ScriptedBehavior::default());
    let first = h
        .service
        .process(product_request("nonce-1"))
        .await
        .expect("first");
    let second = h
        .service
        .process(product_request("nonce-2"))
        .await
        .expect("second");
    assert_ne!(first.order.order_id, second.order.order_id);
    assert_ne!(Uuid::nil(), first.order.order_id);
}
