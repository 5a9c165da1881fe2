use crate::database::error::DatabaseError;
use crate::gateway::types::{GatewayName, Money};
use crate::reconcile::state::PaymentStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A form submission's persisted payment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: Uuid,
    pub gateway: String,
    pub payment_status: PaymentStatus,
    /// Gateway id of the most recent financial transaction.
    pub transaction_id: Option<String>,
    /// Recurring-billing id; written once for the life of the order.
    pub subscription_id: Option<String>,
    pub amount: Option<String>,
    pub currency: Option<String>,
    pub customer_ref: Option<String>,
    pub plan_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: Uuid,
    pub gateway: GatewayName,
    pub amount: Option<Money>,
    pub plan_ref: Option<String>,
}

/// Fields applied alongside a status transition. `None` leaves the stored
/// value untouched.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub transaction_id: Option<String>,
    pub amount: Option<Money>,
    pub failure_reason: Option<String>,
    pub customer_ref: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TransitionResult {
    Updated(Order),
    /// The conditional update matched no row because the status had already
    /// moved on; carries the status observed afterwards.
    Conflict {
        current: Option<PaymentStatus>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentRecordKind {
    InitialPayment,
    RecurringPayment,
    RecurringFailure,
    Refund,
}

impl PaymentRecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordKind::InitialPayment => "initial_payment",
            PaymentRecordKind::RecurringPayment => "recurring_payment",
            PaymentRecordKind::RecurringFailure => "recurring_failure",
            PaymentRecordKind::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub order_id: Uuid,
    pub kind: PaymentRecordKind,
    /// Transaction id for payments, event id for failures. Part of the
    /// uniqueness key that makes duplicate webhook deliveries harmless.
    pub reference: String,
    pub amount: Option<Money>,
    pub note: Option<String>,
}

/// Persistence boundary for orders. Webhook requests for the same order may
/// run concurrently, so the status update is a single conditional
/// read-modify-write: `transition` succeeds only while the stored status
/// still equals `expected`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, order: NewOrder) -> Result<Order, DatabaseError>;

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, DatabaseError>;

    /// Look up an order by a gateway-side id, matching `transaction_id` or
    /// `subscription_id` by equality.
    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError>;

    async fn transition(
        &self,
        order_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        patch: OrderPatch,
    ) -> Result<TransitionResult, DatabaseError>;

    /// Write the subscription id if it is not already set. Returns `false`
    /// when a different id is already present (the write-once invariant).
    async fn set_subscription_id(
        &self,
        order_id: Uuid,
        subscription_id: &str,
    ) -> Result<bool, DatabaseError>;

    /// Append to the order's payment history. Returns `false` when an entry
    /// with the same `(order_id, kind, reference)` already exists.
    async fn append_payment_record(&self, record: NewPaymentRecord)
        -> Result<bool, DatabaseError>;

    async fn record_note(&self, order_id: Uuid, note: &str) -> Result<(), DatabaseError>;
}
