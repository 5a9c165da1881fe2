//! The reconciliation state machine.
//!
//! A pure function over `(PaymentStatus, GatewayEvent) -> Outcome`. All
//! gateway and store I/O stays outside; the engine interprets the returned
//! side effects. Keeping this pure is what makes webhook handling safe under
//! at-least-once delivery: a transition either matches its precondition and
//! fires once, or is rejected as a no-op.

use crate::gateway::types::{EventDetail, GatewayEvent, Money, TransactionSummary};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created at submission time, gateway call not yet resolved.
    Processing,
    /// Awaiting asynchronous settlement by the gateway.
    Pending,
    Paid,
    Failed,
    Active,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Processing => "processing",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Active => "active",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Expired => "expired",
        }
    }

    /// Terminal states are never reopened by later events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Cancelled | PaymentStatus::Expired)
    }

    /// States from which an initial (synchronous-path) outcome may still
    /// land: the order is awaiting its first settled gateway result.
    pub fn is_settling(&self) -> bool {
        matches!(self, PaymentStatus::Processing | PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "processing" => Ok(PaymentStatus::Processing),
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "active" => Ok(PaymentStatus::Active),
            "cancelled" | "canceled" => Ok(PaymentStatus::Cancelled),
            "expired" => Ok(PaymentStatus::Expired),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// What the engine should do once a transition (or a status-preserving
/// event) has been accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    MarkPaid {
        transaction_id: String,
        amount: Money,
    },
    MarkFailed {
        reason: String,
    },
    StartSubscription {
        subscription_id: String,
        first_transaction: Option<TransactionSummary>,
    },
    RecordRecurringPayment {
        transaction: TransactionSummary,
    },
    RecordRecurringFailure {
        reason: String,
    },
    CancelSubscription {
        subscription_id: String,
    },
    ExpireSubscription {
        subscription_id: String,
    },
    RecordNote {
        note: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The event moves the order to a new status.
    Transition {
        next_status: PaymentStatus,
        effects: Vec<SideEffect>,
    },
    /// The event is accepted but the lifecycle status does not change
    /// (recurring charges, idempotent re-deliveries, notes).
    Unchanged { effects: Vec<SideEffect> },
    /// The order's current status does not satisfy the event's
    /// precondition. Logged and acknowledged, never forced.
    Rejected { reason: RejectReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectReason {
    pub current: PaymentStatus,
    pub event_kind: String,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event '{}' not applicable while order is '{}'",
            self.event_kind, self.current
        )
    }
}

fn rejected(current: PaymentStatus, event: &GatewayEvent) -> Outcome {
    Outcome::Rejected {
        reason: RejectReason {
            current,
            event_kind: event.kind_name().to_string(),
        },
    }
}

/// Compute the next state and side effects for `event` against an order
/// currently in `status`.
pub fn apply(status: PaymentStatus, event: &GatewayEvent) -> Outcome {
    match &event.detail {
        EventDetail::ChargeSucceeded {
            transaction_id,
            amount,
        } => {
            if status.is_settling() {
                Outcome::Transition {
                    next_status: PaymentStatus::Paid,
                    effects: vec![SideEffect::MarkPaid {
                        transaction_id: transaction_id.clone(),
                        amount: amount.clone(),
                    }],
                }
            } else {
                rejected(status, event)
            }
        }

        EventDetail::ChargeFailed { failure_reason, .. } => {
            if status.is_settling() {
                Outcome::Transition {
                    next_status: PaymentStatus::Failed,
                    effects: vec![SideEffect::MarkFailed {
                        reason: failure_reason.clone(),
                    }],
                }
            } else {
                rejected(status, event)
            }
        }

        EventDetail::SubscriptionActivated {
            subscription_id,
            first_transaction,
        } => match status {
            _ if status.is_settling() => Outcome::Transition {
                next_status: PaymentStatus::Active,
                effects: vec![SideEffect::StartSubscription {
                    subscription_id: subscription_id.clone(),
                    first_transaction: first_transaction.clone(),
                }],
            },
            // Re-delivered activation for an already-active subscription is
            // benign; keep a trace in the order history.
            PaymentStatus::Active => Outcome::Unchanged {
                effects: vec![SideEffect::RecordNote {
                    note: format!("Subscription {} already active.", subscription_id),
                }],
            },
            _ => rejected(status, event),
        },

        EventDetail::SubscriptionCharged {
            subscription_id,
            transaction,
        } => match status {
            PaymentStatus::Active => Outcome::Unchanged {
                effects: vec![SideEffect::RecordRecurringPayment {
                    transaction: transaction.clone(),
                }],
            },
            // A charge delivered after cancellation/expiry still belongs in
            // the payment history, but must not reopen the order.
            PaymentStatus::Cancelled | PaymentStatus::Expired => Outcome::Unchanged {
                effects: vec![
                    SideEffect::RecordRecurringPayment {
                        transaction: transaction.clone(),
                    },
                    SideEffect::RecordNote {
                        note: format!(
                            "Recurring charge {} received for subscription {} after order reached '{}'.",
                            transaction.transaction_id, subscription_id, status
                        ),
                    },
                ],
            },
            _ => rejected(status, event),
        },

        EventDetail::SubscriptionChargeFailed {
            subscription_id,
            failure_reason,
        } => match status {
            // The gateway drives retry/cancellation policy; a failed
            // recurring charge never cancels the subscription here.
            PaymentStatus::Active => Outcome::Unchanged {
                effects: vec![SideEffect::RecordRecurringFailure {
                    reason: failure_reason.clone(),
                }],
            },
            PaymentStatus::Cancelled | PaymentStatus::Expired => Outcome::Unchanged {
                effects: vec![SideEffect::RecordNote {
                    note: format!(
                        "Failed recurring charge reported for subscription {} after order reached '{}'.",
                        subscription_id, status
                    ),
                }],
            },
            _ => rejected(status, event),
        },

        EventDetail::SubscriptionCanceled { subscription_id } => match status {
            PaymentStatus::Active => Outcome::Transition {
                next_status: PaymentStatus::Cancelled,
                effects: vec![SideEffect::CancelSubscription {
                    subscription_id: subscription_id.clone(),
                }],
            },
            PaymentStatus::Cancelled => Outcome::Unchanged { effects: vec![] },
            _ => rejected(status, event),
        },

        EventDetail::SubscriptionExpired { subscription_id } => match status {
            PaymentStatus::Active => Outcome::Transition {
                next_status: PaymentStatus::Expired,
                effects: vec![SideEffect::ExpireSubscription {
                    subscription_id: subscription_id.clone(),
                }],
            },
            PaymentStatus::Expired => Outcome::Unchanged { effects: vec![] },
            _ => rejected(status, event),
        },

        EventDetail::Unrecognized { kind, .. } => Outcome::Unchanged {
            effects: vec![SideEffect::RecordNote {
                note: format!("Unhandled gateway event: {}", kind),
            }],
        },
    }
}
