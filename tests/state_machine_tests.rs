//! Property-style checks of the reconciliation state machine across the
//! whole status/event matrix.

use chrono::Utc;
use formpay_backend::gateway::types::{
    EventDetail, GatewayEvent, GatewayName, Money, TransactionSummary,
};
use formpay_backend::reconcile::state::{apply, Outcome, PaymentStatus, SideEffect};

const ALL_STATUSES: [PaymentStatus; 7] = [
    PaymentStatus::Processing,
    PaymentStatus::Pending,
    PaymentStatus::Paid,
    PaymentStatus::Failed,
    PaymentStatus::Active,
    PaymentStatus::Cancelled,
    PaymentStatus::Expired,
];

fn event(detail: EventDetail) -> GatewayEvent {
    GatewayEvent {
        gateway: GatewayName::Stripe,
        event_id: "evt_matrix".to_string(),
        occurred_at: Utc::now(),
        order_ref: None,
        detail,
    }
}

fn all_events() -> Vec<GatewayEvent> {
    vec![
        event(EventDetail::ChargeSucceeded {
            transaction_id: "txn".to_string(),
            amount: Money::new("10.00", "USD"),
        }),
        event(EventDetail::ChargeFailed {
            transaction_id: "txn".to_string(),
            failure_reason: "declined".to_string(),
        }),
        event(EventDetail::SubscriptionActivated {
            subscription_id: "sub".to_string(),
            first_transaction: None,
        }),
        event(EventDetail::SubscriptionCharged {
            subscription_id: "sub".to_string(),
            transaction: TransactionSummary {
                transaction_id: "txn".to_string(),
                amount: Money::new("25.00", "USD"),
            },
        }),
        event(EventDetail::SubscriptionChargeFailed {
            subscription_id: "sub".to_string(),
            failure_reason: "insufficient funds".to_string(),
        }),
        event(EventDetail::SubscriptionCanceled {
            subscription_id: "sub".to_string(),
        }),
        event(EventDetail::SubscriptionExpired {
            subscription_id: "sub".to_string(),
        }),
        event(EventDetail::Unrecognized {
            kind: "mystery".to_string(),
            subject_id: None,
        }),
    ]
}

#[test]
fn no_event_moves_a_terminal_order_to_another_status() {
    for terminal in [PaymentStatus::Cancelled, PaymentStatus::Expired] {
        for delivered in all_events() {
            match apply(terminal, &delivered) {
                Outcome::Transition { next_status, .. } => panic!(
                    "terminal {:?} moved to {:?} by {:?}",
                    terminal,
                    next_status,
                    delivered.kind_name()
                ),
                Outcome::Unchanged { .. } | Outcome::Rejected { .. } => {}
            }
        }
    }
}

#[test]
fn applying_an_outcome_twice_is_stable() {
    // For every (status, event) pair that transitions, re-applying the same
    // event against the new status must not transition again.
    for status in ALL_STATUSES {
        for delivered in all_events() {
            if let Outcome::Transition { next_status, .. } = apply(status, &delivered) {
                match apply(next_status, &delivered) {
                    Outcome::Transition {
                        next_status: again, ..
                    } => panic!(
                        "event {:?} transitioned twice: {:?} -> {:?} -> {:?}",
                        delivered.kind_name(),
                        status,
                        next_status,
                        again
                    ),
                    Outcome::Unchanged { .. } | Outcome::Rejected { .. } => {}
                }
            }
        }
    }
}

#[test]
fn settling_states_accept_exactly_the_initial_outcomes() {
    for status in [PaymentStatus::Processing, PaymentStatus::Pending] {
        assert!(matches!(
            apply(
                status,
                &event(EventDetail::ChargeSucceeded {
                    transaction_id: "txn".to_string(),
                    amount: Money::new("10.00", "USD"),
                })
            ),
            Outcome::Transition {
                next_status: PaymentStatus::Paid,
                ..
            }
        ));
        assert!(matches!(
            apply(
                status,
                &event(EventDetail::SubscriptionActivated {
                    subscription_id: "sub".to_string(),
                    first_transaction: None,
                })
            ),
            Outcome::Transition {
                next_status: PaymentStatus::Active,
                ..
            }
        ));
        // Recurring charges require an active subscription.
        assert!(matches!(
            apply(
                status,
                &event(EventDetail::SubscriptionCharged {
                    subscription_id: "sub".to_string(),
                    transaction: TransactionSummary {
                        transaction_id: "txn".to_string(),
                        amount: Money::new("25.00", "USD"),
                    },
                })
            ),
            Outcome::Rejected { .. }
        ));
    }
}

#[test]
fn unrecognized_events_never_transition_any_status() {
    let delivered = event(EventDetail::Unrecognized {
        kind: "subscription_trial_ended".to_string(),
        subject_id: Some("sub".to_string()),
    });
    for status in ALL_STATUSES {
        match apply(status, &delivered) {
            Outcome::Unchanged { effects } => {
                assert!(matches!(effects.as_slice(), [SideEffect::RecordNote { .. }]));
            }
            other => panic!("unexpected outcome for {:?}: {:?}", status, other),
        }
    }
}
