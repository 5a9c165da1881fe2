use crate::gateway::client::GatewayClient;
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{
    BillingAddress, ChargeOutcome, ChargeRequest, CustomerDetails, CustomerProfile, DeclineDetail,
    EventDetail, GatewayEvent, GatewayName, Money, Plan, RefundOutcome, SubscriptionDetails,
    SubscriptionOutcome, SubscriptionRequest, TransactionSummary,
};
use crate::gateway::utils::{hmac_sha256_hex, secure_eq, Auth, GatewayHttpClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub publishable_key: Option<String>,
    pub webhook_secret: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Accepted clock skew for webhook signature timestamps, in seconds.
    pub signature_tolerance_secs: i64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            publishable_key: None,
            webhook_secret: String::new(),
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            signature_tolerance_secs: 300,
        }
    }
}

impl StripeConfig {
    pub fn from_env() -> GatewayResult<Self> {
        let secret_key =
            std::env::var("STRIPE_SECRET_KEY").map_err(|_| GatewayError::ValidationError {
                message: "STRIPE_SECRET_KEY environment variable is required".to_string(),
                field: Some("STRIPE_SECRET_KEY".to_string()),
            })?;
        let webhook_secret =
            std::env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| GatewayError::ValidationError {
                message: "STRIPE_WEBHOOK_SECRET environment variable is required".to_string(),
                field: Some("STRIPE_WEBHOOK_SECRET".to_string()),
            })?;

        Ok(Self {
            publishable_key: std::env::var("STRIPE_PUBLISHABLE_KEY").ok(),
            base_url: std::env::var("STRIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            timeout_secs: std::env::var("STRIPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("STRIPE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(3),
            signature_tolerance_secs: std::env::var("STRIPE_SIGNATURE_TOLERANCE_SECS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(300),
            secret_key,
            webhook_secret,
        })
    }
}

pub struct StripeGateway {
    config: StripeConfig,
    http: GatewayHttpClient,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> GatewayResult<Self> {
        let http =
            GatewayHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> GatewayResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn auth(&self) -> Auth<'_> {
        Auth::Bearer(&self.config.secret_key)
    }

    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(String, String)>,
    ) -> GatewayResult<T> {
        let result: Result<T, GatewayError> = self
            .http
            .request_form(reqwest::Method::POST, &self.endpoint(path), self.auth(), &params)
            .await;
        result.map_err(Self::map_api_error)
    }

    /// Re-shape the generic HTTP error into a decline when the body carries a
    /// Stripe card error.
    fn map_api_error(err: GatewayError) -> GatewayError {
        let (parsed, retryable, fallback_code) = match &err {
            GatewayError::ApiError {
                message,
                retryable,
                code,
                ..
            } => {
                let parsed = message.find('{').and_then(|start| {
                    serde_json::from_str::<StripeErrorEnvelope>(&message[start..]).ok()
                });
                (parsed, *retryable, code.clone())
            }
            _ => return err,
        };
        let Some(parsed) = parsed else {
            return err;
        };

        let detail = parsed.error;
        if detail.error_type.as_deref() == Some("card_error") {
            GatewayError::DeclinedError {
                message: detail
                    .message
                    .clone()
                    .unwrap_or_else(|| "Card was declined".to_string()),
                details: vec![DeclineDetail {
                    code: detail
                        .decline_code
                        .or(detail.code)
                        .unwrap_or_else(|| "card_declined".to_string()),
                    message: detail
                        .message
                        .unwrap_or_else(|| "Card was declined".to_string()),
                    attribute: detail.param,
                }],
            }
        } else {
            GatewayError::ApiError {
                gateway: "stripe".to_string(),
                message: detail
                    .message
                    .unwrap_or_else(|| "stripe request failed".to_string()),
                code: detail.code.or(fallback_code),
                retryable,
            }
        }
    }

    fn verify_signature(&self, header: &str, body: &[u8]) -> GatewayResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(GatewayError::AuthenticityError {
            message: "signature header missing timestamp".to_string(),
        })?;
        if candidates.is_empty() {
            return Err(GatewayError::AuthenticityError {
                message: "signature header missing v1 signature".to_string(),
            });
        }

        let age = (Utc::now().timestamp() - timestamp).abs();
        if age > self.config.signature_tolerance_secs {
            return Err(GatewayError::AuthenticityError {
                message: format!("signature timestamp outside tolerance ({}s old)", age),
            });
        }

        let mut signed_payload = Vec::with_capacity(body.len() + 16);
        signed_payload.extend_from_slice(timestamp.to_string().as_bytes());
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(body);
        let expected = hmac_sha256_hex(&signed_payload, &self.config.webhook_secret).ok_or(
            GatewayError::AuthenticityError {
                message: "unable to compute webhook digest".to_string(),
            },
        )?;

        if candidates
            .iter()
            .any(|candidate| secure_eq(expected.as_bytes(), candidate.as_bytes()))
        {
            Ok(())
        } else {
            Err(GatewayError::AuthenticityError {
                message: "webhook signature mismatch".to_string(),
            })
        }
    }

    fn decode_event(&self, body: &[u8]) -> GatewayResult<GatewayEvent> {
        let envelope: StripeEventEnvelope =
            serde_json::from_slice(body).map_err(|e| GatewayError::MalformedEventError {
                message: format!("invalid event payload: {}", e),
            })?;

        let occurred_at = DateTime::<Utc>::from_timestamp(envelope.created.unwrap_or(0), 0)
            .unwrap_or_else(Utc::now);
        let object = &envelope.data.object;
        let previous_status = envelope
            .data
            .previous_attributes
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(|v| v.as_str());

        let order_ref = object
            .get("metadata")
            .and_then(|m| m.get("order_id"))
            .and_then(|v| v.as_str())
            .and_then(|id| Uuid::parse_str(id).ok());

        let str_field = |name: &str| object.get(name).and_then(|v| v.as_str()).map(String::from);
        let id = str_field("id").ok_or(GatewayError::MalformedEventError {
            message: "event object missing id".to_string(),
        });
        let currency = object
            .get("currency")
            .and_then(|v| v.as_str())
            .unwrap_or("usd");
        let minor_amount = |name: &str| object.get(name).and_then(|v| v.as_i64());

        let detail = match envelope.event_type.as_str() {
            "payment_intent.succeeded" => EventDetail::ChargeSucceeded {
                transaction_id: id?,
                amount: Money::from_minor_units(
                    minor_amount("amount_received")
                        .or_else(|| minor_amount("amount"))
                        .unwrap_or(0),
                    currency,
                ),
            },
            "payment_intent.payment_failed" => EventDetail::ChargeFailed {
                transaction_id: id?,
                failure_reason: object
                    .get("last_payment_error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("Payment failed")
                    .to_string(),
            },
            "invoice.payment_succeeded" | "invoice.payment_failed" => {
                let subscription_id = invoice_subscription_id(object).ok_or(
                    GatewayError::MalformedEventError {
                        message: "invoice event missing subscription reference".to_string(),
                    },
                )?;
                let amount_due = minor_amount("amount_due").unwrap_or(0);
                // Zero-amount invoices (trials, below-minimum charges) carry
                // no financial state and are acknowledged untouched.
                if amount_due == 0 {
                    EventDetail::Unrecognized {
                        kind: format!("{} (zero amount due)", envelope.event_type),
                        subject_id: Some(subscription_id),
                    }
                } else if envelope.event_type == "invoice.payment_failed" {
                    EventDetail::SubscriptionChargeFailed {
                        subscription_id,
                        failure_reason: str_field("billing_reason")
                            .map(|r| format!("Invoice payment failed ({})", r))
                            .unwrap_or_else(|| "Invoice payment failed".to_string()),
                    }
                } else {
                    let transaction_id = match str_field("payment_intent") {
                        Some(payment_intent) => payment_intent,
                        None => id?,
                    };
                    let transaction = TransactionSummary {
                        transaction_id,
                        amount: Money::from_minor_units(amount_due, currency),
                    };
                    if str_field("billing_reason").as_deref() == Some("subscription_create") {
                        EventDetail::SubscriptionActivated {
                            subscription_id,
                            first_transaction: Some(transaction),
                        }
                    } else {
                        EventDetail::SubscriptionCharged {
                            subscription_id,
                            transaction,
                        }
                    }
                }
            }
            "customer.subscription.deleted" => EventDetail::SubscriptionCanceled {
                subscription_id: id?,
            },
            "customer.subscription.updated" => {
                let status = str_field("status").unwrap_or_default();
                let changed = previous_status.is_some_and(|prev| prev != status);
                if changed && status == "active" {
                    EventDetail::SubscriptionActivated {
                        subscription_id: id?,
                        first_transaction: None,
                    }
                } else if changed && status == "canceled" {
                    EventDetail::SubscriptionCanceled { subscription_id: id? }
                } else {
                    EventDetail::Unrecognized {
                        kind: format!("customer.subscription.updated ({})", status),
                        subject_id: str_field("id"),
                    }
                }
            }
            other => EventDetail::Unrecognized {
                kind: other.to_string(),
                subject_id: str_field("id"),
            },
        };

        Ok(GatewayEvent {
            gateway: GatewayName::Stripe,
            event_id: envelope.id,
            occurred_at,
            order_ref,
            detail,
        })
    }
}

/// Newer invoice payloads nest the subscription under `parent`, older ones
/// carry it at the top level.
fn invoice_subscription_id(object: &JsonValue) -> Option<String> {
    object
        .get("subscription")
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| {
            object
                .get("parent")
                .and_then(|p| p.get("subscription_details"))
                .and_then(|d| d.get("subscription"))
                .and_then(|v| v.as_str())
                .map(String::from)
        })
}

#[async_trait]
impl GatewayClient for StripeGateway {
    fn name(&self) -> GatewayName {
        GatewayName::Stripe
    }

    async fn generate_client_token(&self) -> GatewayResult<String> {
        self.config
            .publishable_key
            .clone()
            .ok_or(GatewayError::ValidationError {
                message: "STRIPE_PUBLISHABLE_KEY is not configured".to_string(),
                field: Some("STRIPE_PUBLISHABLE_KEY".to_string()),
            })
    }

    async fn create_charge(&self, request: ChargeRequest) -> GatewayResult<ChargeOutcome> {
        request.amount.validate_positive("amount")?;
        if request.payment_method_token.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "payment method token is required".to_string(),
                field: Some("payment_method_token".to_string()),
            });
        }

        let mut params = vec![
            ("amount".to_string(), request.amount.to_minor_units()?.to_string()),
            ("currency".to_string(), request.amount.currency.to_lowercase()),
            ("payment_method".to_string(), request.payment_method_token.clone()),
            ("confirm".to_string(), "true".to_string()),
            ("metadata[order_id]".to_string(), request.order_id.to_string()),
        ];
        if let Some(email) = request.customer.email.as_deref() {
            params.push(("receipt_email".to_string(), email.trim().to_lowercase()));
        }
        if let Some(postal) = request.billing.as_ref().and_then(|b| b.sanitized_postal_code()) {
            params.push(("shipping[address][postal_code]".to_string(), postal));
        }

        let intent: StripePaymentIntent =
            self.post_form("/v1/payment_intents", params).await?;
        info!(payment_intent = %intent.id, "stripe payment intent confirmed");

        Ok(ChargeOutcome {
            transaction_id: intent.id,
            status: intent.status,
            amount: Money::from_minor_units(
                intent.amount_received.unwrap_or(intent.amount),
                &intent.currency,
            ),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Option<Money>,
    ) -> GatewayResult<RefundOutcome> {
        let mut params = vec![("payment_intent".to_string(), transaction_id.to_string())];
        if let Some(money) = amount {
            params.push(("amount".to_string(), money.to_minor_units()?.to_string()));
        }
        let refund: StripeRefund = self.post_form("/v1/refunds", params).await?;
        Ok(RefundOutcome {
            refund_id: refund.id,
            status: refund.status,
        })
    }

    async fn void(&self, transaction_id: &str) -> GatewayResult<RefundOutcome> {
        let cancelled: StripePaymentIntent = self
            .post_form(
                &format!("/v1/payment_intents/{}/cancel", transaction_id),
                Vec::new(),
            )
            .await?;
        Ok(RefundOutcome {
            refund_id: cancelled.id,
            status: cancelled.status,
        })
    }

    async fn create_customer(
        &self,
        customer: &CustomerDetails,
        payment_method_token: &str,
        _billing: Option<&BillingAddress>,
    ) -> GatewayResult<CustomerProfile> {
        let mut params = vec![("payment_method".to_string(), payment_method_token.to_string())];
        params.push((
            "invoice_settings[default_payment_method]".to_string(),
            payment_method_token.to_string(),
        ));
        if let Some(email) = customer.email.as_deref() {
            params.push(("email".to_string(), email.trim().to_lowercase()));
        }
        let name = [customer.first_name.as_deref(), customer.last_name.as_deref()]
            .iter()
            .flatten()
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            params.push(("name".to_string(), name));
        }
        if let Some(phone) = customer.phone.as_deref() {
            params.push(("phone".to_string(), phone.to_string()));
        }

        let created: StripeCustomer = self.post_form("/v1/customers", params).await?;
        Ok(CustomerProfile {
            customer_ref: created.id,
            payment_method_token: Some(payment_method_token.to_string()),
        })
    }

    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        payment_method_token: &str,
    ) -> GatewayResult<String> {
        let attached: StripePaymentMethod = self
            .post_form(
                &format!("/v1/payment_methods/{}/attach", payment_method_token),
                vec![("customer".to_string(), customer_ref.to_string())],
            )
            .await?;
        Ok(attached.id)
    }

    async fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> GatewayResult<SubscriptionOutcome> {
        let customer_ref = request.customer_ref.ok_or(GatewayError::ValidationError {
            message: "a vaulted customer is required for subscriptions".to_string(),
            field: Some("customer_ref".to_string()),
        })?;

        let params = vec![
            ("customer".to_string(), customer_ref),
            ("items[0][price]".to_string(), request.plan_id.clone()),
            (
                "default_payment_method".to_string(),
                request.payment_method_token.clone(),
            ),
            ("metadata[order_id]".to_string(), request.order_id.to_string()),
            (
                "expand[]".to_string(),
                "latest_invoice.payment_intent".to_string(),
            ),
        ];

        let created: StripeSubscription = self.post_form("/v1/subscriptions", params).await?;
        info!(subscription_id = %created.id, plan_id = %request.plan_id, "stripe subscription created");

        let first_transaction = created.latest_invoice.as_ref().and_then(|invoice| {
            let payment_intent = invoice.payment_intent.as_ref()?;
            Some(TransactionSummary {
                transaction_id: payment_intent.id.clone(),
                amount: Money::from_minor_units(
                    payment_intent.amount_received.unwrap_or(payment_intent.amount),
                    &payment_intent.currency,
                ),
            })
        });

        Ok(SubscriptionOutcome {
            subscription_id: created.id,
            status: created.status,
            first_transaction,
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> GatewayResult<()> {
        let _cancelled: StripeSubscription = self
            .http
            .request_form(
                reqwest::Method::DELETE,
                &self.endpoint(&format!("/v1/subscriptions/{}", subscription_id)),
                self.auth(),
                &[],
            )
            .await
            .map_err(Self::map_api_error)?;
        Ok(())
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> GatewayResult<SubscriptionDetails> {
        let subscription: StripeSubscription = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/subscriptions/{}", subscription_id)),
                self.auth(),
                None,
                &[],
            )
            .await
            .map_err(Self::map_api_error)?;

        Ok(SubscriptionDetails {
            subscription_id: subscription.id,
            status: subscription.status,
            plan_id: subscription
                .items
                .as_ref()
                .and_then(|items| items.data.first())
                .and_then(|item| item.price.as_ref())
                .map(|price| price.id.clone()),
            order_ref: subscription
                .metadata
                .as_ref()
                .and_then(|m| m.get("order_id"))
                .and_then(|v| v.as_str())
                .and_then(|id| Uuid::parse_str(id).ok()),
        })
    }

    async fn fetch_plans(&self) -> GatewayResult<Vec<Plan>> {
        let prices: StripeList<StripePrice> = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint("/v1/prices?active=true&limit=100"),
                self.auth(),
                None,
                &[],
            )
            .await
            .map_err(Self::map_api_error)?;

        Ok(prices
            .data
            .into_iter()
            .map(|price| Plan {
                name: price
                    .nickname
                    .clone()
                    .unwrap_or_else(|| price.id.clone()),
                price: Money::from_minor_units(price.unit_amount.unwrap_or(0), &price.currency),
                billing_frequency: price.recurring.as_ref().map(|r| r.interval.clone()),
                id: price.id,
            })
            .collect())
    }

    fn verify_webhook(&self, signature: Option<&str>, body: &[u8]) -> GatewayResult<GatewayEvent> {
        let header = signature.ok_or(GatewayError::AuthenticityError {
            message: "missing Stripe-Signature header".to_string(),
        })?;
        self.verify_signature(header, body)?;
        self.decode_event(body)
    }

    fn verify_challenge(&self, _challenge: &str) -> GatewayResult<String> {
        Err(GatewayError::ValidationError {
            message: "stripe does not issue webhook challenges".to_string(),
            field: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
    decline_code: Option<String>,
    message: Option<String>,
    param: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    status: String,
    amount: i64,
    #[serde(default)]
    amount_received: Option<i64>,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct StripeCustomer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripePaymentMethod {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: String,
    #[serde(default)]
    metadata: Option<JsonValue>,
    #[serde(default)]
    items: Option<StripeList<StripeSubscriptionItem>>,
    #[serde(default)]
    latest_invoice: Option<StripeInvoice>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    #[serde(default)]
    price: Option<StripePriceRef>,
}

#[derive(Debug, Deserialize)]
struct StripePriceRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeInvoice {
    #[serde(default)]
    payment_intent: Option<StripePaymentIntent>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    #[serde(default)]
    nickname: Option<String>,
    #[serde(default)]
    unit_amount: Option<i64>,
    currency: String,
    #[serde(default)]
    recurring: Option<StripeRecurring>,
}

#[derive(Debug, Deserialize)]
struct StripeRecurring {
    interval: String,
}

#[derive(Debug, Deserialize)]
struct StripeEventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: Option<i64>,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: JsonValue,
    #[serde(default)]
    previous_attributes: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway() -> StripeGateway {
        StripeGateway::new(StripeConfig {
            secret_key: "sk_test".to_string(),
            publishable_key: Some("pk_test".to_string()),
            webhook_secret: "whsec_test".to_string(),
            base_url: "https://api.stripe.com".to_string(),
            timeout_secs: 5,
            max_retries: 1,
            signature_tolerance_secs: 300,
        })
        .expect("gateway init should succeed")
    }

    fn sign(gateway: &StripeGateway, body: &[u8]) -> String {
        let timestamp = Utc::now().timestamp();
        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(body);
        format!(
            "t={},v1={}",
            timestamp,
            hmac_sha256_hex(&signed, &gateway.config.webhook_secret).expect("signing")
        )
    }

    #[test]
    fn valid_signature_is_accepted_and_event_decoded() {
        let gateway = gateway();
        let order_id = Uuid::new_v4();
        let body = serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": Utc::now().timestamp(),
            "data": {
                "object": {
                    "id": "pi_123",
                    "object": "payment_intent",
                    "amount": 1000,
                    "amount_received": 1000,
                    "currency": "usd",
                    "metadata": { "order_id": order_id.to_string() }
                }
            }
        }))
        .expect("serialize");
        let header = sign(&gateway, &body);

        let event = gateway
            .verify_webhook(Some(&header), &body)
            .expect("decode");
        assert_eq!(event.order_ref, Some(order_id));
        match event.detail {
            EventDetail::ChargeSucceeded {
                transaction_id,
                amount,
            } => {
                assert_eq!(transaction_id, "pi_123");
                assert_eq!(amount.amount, "10.00");
            }
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn tampered_body_is_rejected() {
        let gateway = gateway();
        let body = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;
        let header = sign(&gateway, body);
        let tampered =
            br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_2"}}}"#;
        let result = gateway.verify_webhook(Some(&header), tampered);
        assert!(matches!(
            result,
            Err(GatewayError::AuthenticityError { .. })
        ));
    }

    #[test]
    fn missing_signature_header_is_rejected() {
        let gateway = gateway();
        let result = gateway.verify_webhook(None, b"{}");
        assert!(matches!(
            result,
            Err(GatewayError::AuthenticityError { .. })
        ));
    }

    #[test]
    fn first_invoice_maps_to_activation() {
        let gateway = gateway();
        let body = serde_json::to_vec(&json!({
            "id": "evt_2",
            "type": "invoice.payment_succeeded",
            "created": Utc::now().timestamp(),
            "data": {
                "object": {
                    "id": "in_1",
                    "object": "invoice",
                    "amount_due": 2500,
                    "currency": "usd",
                    "billing_reason": "subscription_create",
                    "payment_intent": "pi_first",
                    "parent": { "subscription_details": { "subscription": "sub_9" } }
                }
            }
        }))
        .expect("serialize");
        let header = sign(&gateway, &body);
        let event = gateway.verify_webhook(Some(&header), &body).expect("decode");
        match event.detail {
            EventDetail::SubscriptionActivated {
                subscription_id,
                first_transaction,
            } => {
                assert_eq!(subscription_id, "sub_9");
                let txn = first_transaction.expect("first transaction");
                assert_eq!(txn.transaction_id, "pi_first");
                assert_eq!(txn.amount.amount, "25.00");
            }
            other => panic!("unexpected detail: {:?}", other),
        }
    }

    #[test]
    fn zero_amount_invoice_is_unrecognized() {
        let gateway = gateway();
        let body = serde_json::to_vec(&json!({
            "id": "evt_3",
            "type": "invoice.payment_succeeded",
            "created": Utc::now().timestamp(),
            "data": {
                "object": {
                    "id": "in_2",
                    "amount_due": 0,
                    "currency": "usd",
                    "subscription": "sub_9"
                }
            }
        }))
        .expect("serialize");
        let header = sign(&gateway, &body);
        let event = gateway.verify_webhook(Some(&header), &body).expect("decode");
        assert!(matches!(event.detail, EventDetail::Unrecognized { .. }));
    }

    #[test]
    fn subscription_update_to_active_is_activation() {
        let gateway = gateway();
        let body = serde_json::to_vec(&json!({
            "id": "evt_4",
            "type": "customer.subscription.updated",
            "created": Utc::now().timestamp(),
            "data": {
                "object": { "id": "sub_9", "status": "active" },
                "previous_attributes": { "status": "incomplete" }
            }
        }))
        .expect("serialize");
        let header = sign(&gateway, &body);
        let event = gateway.verify_webhook(Some(&header), &body).expect("decode");
        assert!(matches!(
            event.detail,
            EventDetail::SubscriptionActivated { .. }
        ));
    }
}
