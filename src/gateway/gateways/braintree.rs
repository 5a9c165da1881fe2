use crate::gateway::client::GatewayClient;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{
    BillingAddress, ChargeOutcome, ChargeRequest, CustomerDetails, CustomerProfile, DeclineDetail,
    EventDetail, GatewayEvent, GatewayName, Money, Plan, RefundOutcome, SubscriptionDetails,
    SubscriptionOutcome, SubscriptionRequest, TransactionSummary,
};
use crate::gateway::utils::{hmac_sha256_hex, secure_eq, Auth, GatewayHttpClient};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BraintreeConfig {
    pub merchant_id: String,
    pub public_key: String,
    pub private_key: String,
    pub merchant_account_id: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for BraintreeConfig {
    fn default() -> Self {
        Self {
            merchant_id: String::new(),
            public_key: String::new(),
            private_key: String::new(),
            merchant_account_id: None,
            base_url: "https://api.braintreegateway.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl BraintreeConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| GatewayError::ValidationError {
                message: format!("{} environment variable is required", name),
                field: Some(name.to_string()),
            })
        };

        Ok(Self {
            merchant_id: require("BRAINTREE_MERCHANT_ID")?,
            public_key: require("BRAINTREE_PUBLIC_KEY")?,
            private_key: require("BRAINTREE_PRIVATE_KEY")?,
            merchant_account_id: std::env::var("BRAINTREE_MERCHANT_ACCOUNT_ID").ok(),
            base_url: std::env::var("BRAINTREE_BASE_URL")
                .unwrap_or_else(|_| "https://api.braintreegateway.com".to_string()),
            timeout_secs: std::env::var("BRAINTREE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("BRAINTREE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
        })
    }
}

pub struct BraintreeGateway {
    config: BraintreeConfig,
    http: GatewayHttpClient,
}

impl BraintreeGateway {
    pub fn new(config: BraintreeConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(BraintreeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/merchants/{}{}",
            self.config.base_url, self.config.merchant_id, path
        )
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Basic(&self.config.public_key, &self.config.private_key)
    }

    fn customer_params(customer: &CustomerDetails) -> JsonValue {
        let mut params = json!({});
        if let Some(email) = customer.email.as_deref() {
            params["email"] = json!(email.trim().to_lowercase());
        }
        if let Some(first) = customer.first_name.as_deref() {
            params["first_name"] = json!(first);
        }
        if let Some(last) = customer.last_name.as_deref() {
            params["last_name"] = json!(last);
        }
        if let Some(company) = customer.company.as_deref() {
            params["company"] = json!(company);
        }
        if let Some(phone) = customer.phone.as_deref() {
            params["phone"] = json!(phone);
        }
        params
    }

    fn decline_error(envelope: &BraintreeEnvelope) -> GatewayError {
        GatewayError::DeclinedError {
            message: envelope
                .message
                .clone()
                .unwrap_or_else(|| "Transaction declined".to_string()),
            details: envelope
                .errors
                .iter()
                .map(|e| DeclineDetail {
                    code: e.code.clone(),
                    message: e.message.clone(),
                    attribute: e.attribute.clone(),
                })
                .collect(),
        }
    }

    fn api_error(&self, envelope: &BraintreeEnvelope) -> GatewayError {
        GatewayError::ApiError {
            gateway: "braintree".to_string(),
            message: envelope
                .message
                .clone()
                .unwrap_or_else(|| "request was not successful".to_string()),
            code: envelope.errors.first().map(|e| e.code.clone()),
            retryable: false,
        }
    }

    fn decode_notification(&self, payload: &[u8]) -> GatewayResult<GatewayEvent> {
        let notification: BraintreeNotification =
            serde_json::from_slice(payload).map_err(|e| GatewayError::MalformedEventError {
                message: format!("invalid notification payload: {}", e),
            })?;

        let occurred_at = notification
            .timestamp
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let event_id = notification.id.clone().unwrap_or_else(|| {
            format!(
                "{}:{}",
                notification.kind,
                notification.timestamp.as_deref().unwrap_or("")
            )
        });

        let subscription = notification.subscription.as_ref();
        let transaction = notification.transaction.as_ref();
        let order_ref = subscription
            .and_then(|s| s.order_ref())
            .or_else(|| transaction.and_then(|t| t.order_ref()));

        let require_subscription = || {
            subscription
                .map(|s| s.id.clone())
                .ok_or(GatewayError::MalformedEventError {
                    message: format!("{} notification without subscription", notification.kind),
                })
        };
        let first_transaction = subscription
            .and_then(|s| s.transactions.first())
            .map(BraintreeTransaction::summary);

        let detail = match notification.kind.as_str() {
            "subscription_went_active" => EventDetail::SubscriptionActivated {
                subscription_id: require_subscription()?,
                first_transaction,
            },
            "subscription_charged_successfully" => EventDetail::SubscriptionCharged {
                subscription_id: require_subscription()?,
                transaction: first_transaction.ok_or(GatewayError::MalformedEventError {
                    message: "charge notification without transaction".to_string(),
                })?,
            },
            "subscription_charged_unsuccessfully" => EventDetail::SubscriptionChargeFailed {
                subscription_id: require_subscription()?,
                failure_reason: subscription
                    .and_then(|s| s.transactions.first())
                    .and_then(|t| t.processor_response_text.clone())
                    .unwrap_or_else(|| "Recurring charge failed".to_string()),
            },
            "subscription_canceled" => EventDetail::SubscriptionCanceled {
                subscription_id: require_subscription()?,
            },
            "subscription_expired" => EventDetail::SubscriptionExpired {
                subscription_id: require_subscription()?,
            },
            "transaction_settled" => {
                let txn = transaction.ok_or(GatewayError::MalformedEventError {
                    message: "settlement notification without transaction".to_string(),
                })?;
                EventDetail::ChargeSucceeded {
                    transaction_id: txn.id.clone(),
                    amount: txn.money(),
                }
            }
            "transaction_settlement_declined" => {
                let txn = transaction.ok_or(GatewayError::MalformedEventError {
                    message: "settlement notification without transaction".to_string(),
                })?;
                EventDetail::ChargeFailed {
                    transaction_id: txn.id.clone(),
                    failure_reason: txn
                        .processor_response_text
                        .clone()
                        .unwrap_or_else(|| "Settlement declined".to_string()),
                }
            }
            other => EventDetail::Unrecognized {
                kind: other.to_string(),
                subject_id: subscription
                    .map(|s| s.id.clone())
                    .or_else(|| transaction.map(|t| t.id.clone())),
            },
        };

        Ok(GatewayEvent {
            gateway: GatewayName::Braintree,
            event_id,
            occurred_at,
            order_ref,
            detail,
        })
    }
}

#[async_trait]
impl GatewayClient for BraintreeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Braintree
    }

    async fn generate_client_token(&self) -> GatewayResult<String> {
        let raw: ClientTokenEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/client_token"),
                self.auth(),
                Some(&json!({})),
                &[("Content-Type", "application/json")],
            )
            .await?;
        Ok(raw.client_token)
    }

    async fn create_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        request.amount.validate_positive("amount")?;
        if request.payment_method_token.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "payment method token is required".to_string(),
                field: Some("payment_method_token".to_string()),
            });
        }

        let mut transaction = json!({
            "amount": request.amount.amount,
            "payment_method_nonce": request.payment_method_token,
            "options": { "submit_for_settlement": true },
            "custom_fields": { "order_id": request.order_id.to_string() },
        });
        let customer = Self::customer_params(&request.customer);
        if customer.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            transaction["customer"] = customer;
        }
        if let Some(billing) = request.billing.as_ref() {
            transaction["billing"] = billing_params(billing);
        }
        if let Some(device_data) = request.device_data.as_deref() {
            transaction["device_data"] = json!(device_data);
        }
        if let Some(account) = self.config.merchant_account_id.as_deref() {
            transaction["merchant_account_id"] = json!(account);
        }

        let raw: BraintreeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/transactions"),
                self.auth(),
                Some(&json!({ "transaction": transaction })),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if !raw.success {
            return Err(Self::decline_error(&raw));
        }
        let txn = raw.transaction.ok_or(GatewayError::ApiError {
            gateway: "braintree".to_string(),
            message: "sale response missing transaction".to_string(),
            code: None,
            retryable: false,
        })?;
        info!(transaction_id = %txn.id, "braintree sale submitted for settlement");

        Ok(ChargeOutcome {
            transaction_id: txn.id.clone(),
            status: txn.status.clone().unwrap_or_else(|| "unknown".to_string()),
            amount: txn.money(),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Money>,
    ) -> GatewayResult<RefundOutcome> {
        let body = match amount {
            Some(money) => json!({ "amount": money.amount }),
            None => json!({}),
        };
        let raw: BraintreeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/transactions/{}/refund", transaction_id)),
                self.auth(),
                Some(&body),
                &[("Content-Type", "application/json")],
            )
            .await?;
        if !raw.success {
            return Err(self.api_error(&raw));
        }
        let txn = raw.transaction.ok_or(GatewayError::ApiError {
            gateway: "braintree".to_string(),
            message: "refund response missing transaction".to_string(),
            code: None,
            retryable: false,
        })?;
        Ok(RefundOutcome {
            refund_id: txn.id.clone(),
            status: txn.status.unwrap_or_else(|| "submitted".to_string()),
        })
    }

    async fn void(&self, transaction_id: &str) -> GatewayResult<RefundOutcome> {
        let raw: BraintreeEnvelope = self
            .http
            .request_json(
                reqwest::Method::PUT,
                &self.endpoint(&format!("/transactions/{}/void", transaction_id)),
                self.auth(),
                Some(&json!({})),
                &[("Content-Type", "application/json")],
            )
            .await?;
        if !raw.success {
            return Err(self.api_error(&raw));
        }
        let txn = raw.transaction.ok_or(GatewayError::ApiError {
            gateway: "braintree".to_string(),
            message: "void response missing transaction".to_string(),
            code: None,
            retryable: false,
        })?;
        Ok(RefundOutcome {
            refund_id: txn.id.clone(),
            status: txn.status.unwrap_or_else(|| "voided".to_string()),
        })
    }

    async fn create_customer(
        &self,
        customer: &CustomerDetails,
        payment_method_token: &str,
        billing: Option<&BillingAddress>,
    ) -> GatewayResult<CustomerProfile> {
        let mut params = Self::customer_params(customer);
        params["payment_method_nonce"] = json!(payment_method_token);
        if let Some(billing) = billing {
            params["credit_card"] = json!({ "billing_address": billing_params(billing) });
        }
        let raw: BraintreeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/customers"),
                self.auth(),
                Some(&json!({ "customer": params })),
                &[("Content-Type", "application/json")],
            )
            .await?;
        if !raw.success {
            return Err(self.api_error(&raw));
        }
        let created = raw.customer.ok_or(GatewayError::ApiError {
            gateway: "braintree".to_string(),
            message: "customer response missing customer".to_string(),
            code: None,
            retryable: false,
        })?;
        Ok(CustomerProfile {
            customer_ref: created.id,
            payment_method_token: created
                .payment_methods
                .first()
                .map(|m| m.token.clone()),
        })
    }

    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        payment_method_token: &str,
    ) -> GatewayResult<String> {
        let raw: BraintreeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/payment_methods"),
                self.auth(),
                Some(&json!({
                    "payment_method": {
                        "customer_id": customer_ref,
                        "payment_method_nonce": payment_method_token,
                        "options": { "make_default": true },
                    }
                })),
                &[("Content-Type", "application/json")],
            )
            .await?;
        if !raw.success {
            return Err(self.api_error(&raw));
        }
        raw.payment_method
            .map(|m| m.token)
            .ok_or(GatewayError::ApiError {
                gateway: "braintree".to_string(),
                message: "payment method response missing token".to_string(),
                code: None,
                retryable: false,
            })
    }

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> GatewayResult<SubscriptionOutcome> {
        let mut subscription = json!({
            "plan_id": request.plan_id,
            "payment_method_token": request.payment_method_token,
            "custom_fields": { "order_id": request.order_id.to_string() },
        });
        if let Some(account) = self.config.merchant_account_id.as_deref() {
            subscription["merchant_account_id"] = json!(account);
        }

        let raw: BraintreeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/subscriptions"),
                self.auth(),
                Some(&json!({ "subscription": subscription })),
                &[("Content-Type", "application/json")],
            )
            .await?;

        if !raw.success {
            return Err(Self::decline_error(&raw));
        }
        let created = raw.subscription.ok_or(GatewayError::ApiError {
            gateway: "braintree".to_string(),
            message: "subscription response missing subscription".to_string(),
            code: None,
            retryable: false,
        })?;
        info!(subscription_id = %created.id, plan_id = %request.plan_id, "braintree subscription created");

        Ok(SubscriptionOutcome {
            subscription_id: created.id.clone(),
            status: created.status.clone().unwrap_or_else(|| "Active".to_string()),
            first_transaction: created.transactions.first().map(BraintreeTransaction::summary),
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<()> {
        let raw: BraintreeEnvelope = self
            .http
            .request_json(
                reqwest::Method::PUT,
                &self.endpoint(&format!("/subscriptions/{}/cancel", subscription_id)),
                self.auth(),
                Some(&json!({})),
                &[("Content-Type", "application/json")],
            )
            .await?;
        if !raw.success {
            return Err(self.api_error(&raw));
        }
        Ok(())
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> GatewayResult<SubscriptionDetails> {
        let raw: SubscriptionEnvelope = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/subscriptions/{}", subscription_id)),
                self.auth(),
                None,
                &[],
            )
            .await?;
        let subscription = raw.subscription;
        Ok(SubscriptionDetails {
            subscription_id: subscription.id.clone(),
            status: subscription
                .status
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            plan_id: subscription.plan_id.clone(),
            order_ref: subscription.order_ref(),
        })
    }

    async fn fetch_plans(&self) -> GatewayResult<Vec<Plan>> {
        let raw: PlansEnvelope = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint("/plans"),
                self.auth(),
                None,
                &[],
            )
            .await?;
        Ok(raw
            .plans
            .into_iter()
            .map(|p| Plan {
                id: p.id,
                name: p.name,
                price: Money::new(p.price, p.currency_iso_code),
                billing_frequency: p.billing_frequency.map(|months| format!("{}-month", months)),
            })
            .collect())
    }

    fn verify_webhook(&self, _signature: Option<&str>, body: &[u8]) -> GatewayResult<GatewayEvent> {
        // The signature travels inside the envelope alongside the payload.
        let envelope: WebhookEnvelope =
            serde_json::from_slice(body).map_err(|e| GatewayError::MalformedEventError {
                message: format!("invalid webhook envelope: {}", e),
            })?;

        let expected = hmac_sha256_hex(envelope.bt_payload.as_bytes(), &self.config.private_key)
            .map(|digest| format!("{}|{}", self.config.public_key, digest))
            .ok_or(GatewayError::AuthenticityError {
                message: "unable to compute webhook digest".to_string(),
            })?;
        if !secure_eq(expected.as_bytes(), envelope.bt_signature.trim().as_bytes()) {
            return Err(GatewayError::AuthenticityError {
                message: "webhook signature mismatch".to_string(),
            });
        }

        let payload = base64::engine::general_purpose::STANDARD
            .decode(envelope.bt_payload.trim())
            .map_err(|e| GatewayError::MalformedEventError {
                message: format!("webhook payload is not valid base64: {}", e),
            })?;
        self.decode_notification(&payload)
    }

    fn verify_challenge(&self, challenge: &str) -> GatewayResult<String> {
        if challenge.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "challenge is required".to_string(),
                field: Some("bt_challenge".to_string()),
            });
        }
        hmac_sha256_hex(challenge.as_bytes(), &self.config.private_key)
            .map(|digest| format!("{}|{}", self.config.public_key, digest))
            .ok_or(GatewayError::AuthenticityError {
                message: "unable to compute challenge digest".to_string(),
            })
    }
}

fn billing_params(billing: &BillingAddress) -> JsonValue {
    let mut params = json!({});
    if let Some(street) = billing.street.as_deref() {
        params["street_address"] = json!(street);
    }
    if let Some(street2) = billing.street2.as_deref() {
        params["extended_address"] = json!(street2);
    }
    if let Some(city) = billing.city.as_deref() {
        params["locality"] = json!(city);
    }
    if let Some(state) = billing.state.as_deref() {
        params["region"] = json!(state);
    }
    if let Some(postal) = billing.sanitized_postal_code() {
        params["postal_code"] = json!(postal);
    }
    if let Some(country) = billing.country_alpha2() {
        params["country_code_alpha2"] = json!(country);
    }
    params
}

#[derive(Debug, Deserialize)]
struct BraintreeEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<BraintreeErrorDetail>,
    #[serde(default)]
    transaction: Option<BraintreeTransaction>,
    #[serde(default)]
    customer: Option<BraintreeCustomer>,
    #[serde(default)]
    payment_method: Option<BraintreePaymentMethod>,
    #[serde(default)]
    subscription: Option<BraintreeSubscription>,
}

#[derive(Debug, Deserialize)]
struct BraintreeErrorDetail {
    code: String,
    message: String,
    #[serde(default)]
    attribute: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BraintreeTransaction {
    id: String,
    #[serde(default)]
    status: Option<String>,
    amount: String,
    #[serde(default = "default_currency")]
    currency_iso_code: String,
    #[serde(default)]
    processor_response_text: Option<String>,
    #[serde(default)]
    custom_fields: Option<CustomFields>,
}

impl BraintreeTransaction {
    fn money(&self) -> Money {
        Money::new(self.amount.clone(), self.currency_iso_code.clone())
    }

    fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            transaction_id: self.id.clone(),
            amount: self.money(),
        }
    }

    fn order_ref(&self) -> Option<Uuid> {
        self.custom_fields
            .as_ref()
            .and_then(|f| f.order_id.as_deref())
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

#[derive(Debug, Deserialize)]
struct BraintreeCustomer {
    id: String,
    #[serde(default)]
    payment_methods: Vec<BraintreePaymentMethod>,
}

#[derive(Debug, Deserialize)]
struct BraintreePaymentMethod {
    token: String,
}

#[derive(Debug, Deserialize)]
struct BraintreeSubscription {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    transactions: Vec<BraintreeTransaction>,
    #[serde(default)]
    custom_fields: Option<CustomFields>,
}

impl BraintreeSubscription {
    fn order_ref(&self) -> Option<Uuid> {
        self.custom_fields
            .as_ref()
            .and_then(|f| f.order_id.as_deref())
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

#[derive(Debug, Deserialize)]
struct CustomFields {
    #[serde(default)]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionEnvelope {
    subscription: BraintreeSubscription,
}

#[derive(Debug, Deserialize)]
struct PlansEnvelope {
    plans: Vec<BraintreePlan>,
}

#[derive(Debug, Deserialize)]
struct BraintreePlan {
    id: String,
    name: String,
    price: String,
    #[serde(default = "default_currency")]
    currency_iso_code: String,
    #[serde(default)]
    billing_frequency: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ClientTokenEnvelope {
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    bt_signature: String,
    bt_payload: String,
}

#[derive(Debug, Deserialize)]
struct BraintreeNotification {
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    subscription: Option<BraintreeSubscription>,
    #[serde(default)]
    transaction: Option<BraintreeTransaction>,
}

fn default_currency() -> String {
    "USD".to_string()
}
