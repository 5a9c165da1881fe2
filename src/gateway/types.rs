use crate::gateway::error::GatewayError;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayName {
    Braintree,
    Stripe,
}

impl GatewayName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Braintree => "braintree",
            GatewayName::Stripe => "stripe",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "braintree" => Ok(GatewayName::Braintree),
            "stripe" => Ok(GatewayName::Stripe),
            _ => Err(GatewayError::ValidationError {
                message: format!("unsupported gateway: {}", value),
                field: Some("gateway".to_string()),
            }),
        }
    }
}

/// Fixed-point monetary amount. The amount is carried as a decimal string to
/// avoid float drift against the gateway's own representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: String,
    pub currency: String,
}

impl Money {
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }

    pub fn validate_positive(&self, field: &str) -> Result<(), GatewayError> {
        let parsed =
            BigDecimal::from_str(&self.amount).map_err(|_| GatewayError::ValidationError {
                message: format!("invalid decimal amount: {}", self.amount),
                field: Some(field.to_string()),
            })?;
        if parsed <= BigDecimal::from(0) {
            return Err(GatewayError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(GatewayError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Convert from the gateway's integer minor units (e.g. cents) into a
    /// decimal string, honoring zero-decimal currencies.
    pub fn from_minor_units(minor: i64, currency: &str) -> Self {
        let currency = currency.to_uppercase();
        let exponent = currency_exponent(&currency);
        let divisor = BigDecimal::from(10_i64.pow(exponent));
        let amount = (BigDecimal::from(minor) / divisor).with_scale(i64::from(exponent));
        Self {
            amount: amount.to_string(),
            currency,
        }
    }

    pub fn to_minor_units(&self) -> Result<i64, GatewayError> {
        use bigdecimal::ToPrimitive;

        let parsed =
            BigDecimal::from_str(&self.amount).map_err(|_| GatewayError::ValidationError {
                message: format!("invalid decimal amount: {}", self.amount),
                field: Some("amount".to_string()),
            })?;
        let exponent = currency_exponent(&self.currency.to_uppercase());
        let scaled = (parsed * BigDecimal::from(10_i64.pow(exponent))).with_scale(0);
        scaled.to_i64().ok_or(GatewayError::ValidationError {
            message: format!("amount out of range: {}", self.amount),
            field: Some("amount".to_string()),
        })
    }
}

fn currency_exponent(currency: &str) -> u32 {
    // Currencies the gateways treat as zero-decimal.
    const ZERO_DECIMAL: &[&str] = &[
        "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
        "XAF", "XOF", "XPF",
    ];
    if ZERO_DECIMAL.contains(&currency) {
        0
    } else {
        2
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingAddress {
    pub street: Option<String>,
    pub street2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl BillingAddress {
    /// Postal code stripped to `[A-Za-z0-9 -]`, at most 20 characters.
    pub fn sanitized_postal_code(&self) -> Option<String> {
        let raw = self.postal_code.as_deref()?;
        let clean: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == '-')
            .take(20)
            .collect();
        if clean.is_empty() {
            None
        } else {
            Some(clean)
        }
    }

    /// Normalize a country value to ISO alpha-2 where known.
    pub fn country_alpha2(&self) -> Option<String> {
        let raw = self.country.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.len() == 2 {
            return Some(raw.to_uppercase());
        }
        let code = match raw.to_lowercase().as_str() {
            "united states" | "usa" => "US",
            "united kingdom" | "great britain" => "GB",
            "canada" => "CA",
            "australia" => "AU",
            "germany" => "DE",
            "france" => "FR",
            "spain" => "ES",
            "mexico" => "MX",
            "italy" => "IT",
            _ => return None,
        };
        Some(code.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: Uuid,
    pub amount: Money,
    pub payment_method_token: String,
    pub customer: CustomerDetails,
    pub billing: Option<BillingAddress>,
    pub device_data: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    pub transaction_id: String,
    pub status: String,
    pub amount: Money,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub order_id: Uuid,
    pub plan_id: String,
    pub payment_method_token: String,
    pub customer_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSummary {
    pub transaction_id: String,
    pub amount: Money,
}

#[derive(Debug, Clone)]
pub struct SubscriptionOutcome {
    pub subscription_id: String,
    pub status: String,
    pub first_transaction: Option<TransactionSummary>,
}

/// Gateway-side view of a subscription, fetched when a webhook payload does
/// not carry the creation-time metadata itself.
#[derive(Debug, Clone)]
pub struct SubscriptionDetails {
    pub subscription_id: String,
    pub status: String,
    pub plan_id: Option<String>,
    pub order_ref: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct CustomerProfile {
    pub customer_ref: String,
    pub payment_method_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub price: Money,
    pub billing_frequency: Option<String>,
}

/// One entry of a gateway's structured decline error list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeclineDetail {
    pub code: String,
    pub message: String,
    pub attribute: Option<String>,
}

/// An asynchronous gateway notification, decoded and verified at the ingress
/// boundary. Not persisted beyond processing.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub gateway: GatewayName,
    pub event_id: String,
    pub occurred_at: DateTime<Utc>,
    /// Order id embedded in the gateway-side metadata at creation time, when
    /// the payload carries it directly.
    pub order_ref: Option<Uuid>,
    pub detail: EventDetail,
}

#[derive(Debug, Clone)]
pub enum EventDetail {
    ChargeSucceeded {
        transaction_id: String,
        amount: Money,
    },
    ChargeFailed {
        transaction_id: String,
        failure_reason: String,
    },
    SubscriptionActivated {
        subscription_id: String,
        first_transaction: Option<TransactionSummary>,
    },
    SubscriptionCharged {
        subscription_id: String,
        transaction: TransactionSummary,
    },
    SubscriptionChargeFailed {
        subscription_id: String,
        failure_reason: String,
    },
    SubscriptionCanceled {
        subscription_id: String,
    },
    SubscriptionExpired {
        subscription_id: String,
    },
    Unrecognized {
        kind: String,
        subject_id: Option<String>,
    },
}

impl GatewayEvent {
    /// The gateway-side id the event should be correlated by: the
    /// transaction id for charge events, the subscription id for
    /// subscription and invoice events.
    pub fn correlation_key(&self) -> Option<&str> {
        match &self.detail {
            EventDetail::ChargeSucceeded { transaction_id, .. }
            | EventDetail::ChargeFailed { transaction_id, .. } => Some(transaction_id),
            EventDetail::SubscriptionActivated {
                subscription_id, ..
            }
            | EventDetail::SubscriptionCharged {
                subscription_id, ..
            }
            | EventDetail::SubscriptionChargeFailed {
                subscription_id, ..
            }
            | EventDetail::SubscriptionCanceled { subscription_id }
            | EventDetail::SubscriptionExpired { subscription_id } => Some(subscription_id),
            EventDetail::Unrecognized { subject_id, .. } => subject_id.as_deref(),
        }
    }

    pub fn is_subscription_event(&self) -> bool {
        matches!(
            self.detail,
            EventDetail::SubscriptionActivated { .. }
                | EventDetail::SubscriptionCharged { .. }
                | EventDetail::SubscriptionChargeFailed { .. }
                | EventDetail::SubscriptionCanceled { .. }
                | EventDetail::SubscriptionExpired { .. }
        )
    }

    pub fn kind_name(&self) -> &str {
        match &self.detail {
            EventDetail::ChargeSucceeded { .. } => "charge_succeeded",
            EventDetail::ChargeFailed { .. } => "charge_failed",
            EventDetail::SubscriptionActivated { .. } => "subscription_activated",
            EventDetail::SubscriptionCharged { .. } => "subscription_charged",
            EventDetail::SubscriptionChargeFailed { .. } => "subscription_charge_failed",
            EventDetail::SubscriptionCanceled { .. } => "subscription_canceled",
            EventDetail::SubscriptionExpired { .. } => "subscription_expired",
            EventDetail::Unrecognized { kind, .. } => kind,
        }
    }
}
