//! End-to-end reconciliation scenarios over an in-memory order store.

use crate::database::memory::{order_fixture, MemoryOrderStore};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::types::{
    EventDetail, GatewayEvent, GatewayName, Money, SubscriptionDetails, TransactionSummary,
};
use crate::reconcile::engine::{AckReason, ReconciliationEngine, WebhookDisposition};
use crate::reconcile::mapper::{EventMapper, SubscriptionMetadataSource};
use crate::reconcile::state::PaymentStatus;
use crate::services::notification::{HookDispatcher, LoggingHook};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

struct StaticMetadata {
    by_subscription: HashMap<String, Option<Uuid>>,
}

#[async_trait]
impl SubscriptionMetadataSource for StaticMetadata {
    async fn fetch_subscription(
        &self,
        _gateway: GatewayName,
        subscription_id: &str,
    ) -> GatewayResult<SubscriptionDetails> {
        match self.by_subscription.get(subscription_id) {
            Some(order_ref) => Ok(SubscriptionDetails {
                subscription_id: subscription_id.to_string(),
                status: "Active".to_string(),
                plan_id: None,
                order_ref: *order_ref,
            }),
            None => Err(GatewayError::ApiError {
                gateway: "test".to_string(),
                message: "subscription not found".to_string(),
                code: Some("404".to_string()),
                retryable: false,
            }),
        }
    }
}

fn engine_with(
    store: Arc<MemoryOrderStore>,
    metadata: HashMap<String, Option<Uuid>>,
) -> ReconciliationEngine {
    let mapper = EventMapper::new(
        store.clone(),
        Arc::new(StaticMetadata {
            by_subscription: metadata,
        }),
    );
    let hooks = Arc::new(HookDispatcher::new().register(Arc::new(LoggingHook)));
    ReconciliationEngine::new(store, mapper, hooks)
}

fn event(order_ref: Option<Uuid>, detail: EventDetail) -> GatewayEvent {
    GatewayEvent {
        gateway: GatewayName::Braintree,
        event_id: "evt_fixture".to_string(),
        occurred_at: Utc::now(),
        order_ref,
        detail,
    }
}

fn charge(subscription_id: &str, transaction_id: &str, order_ref: Option<Uuid>) -> GatewayEvent {
    event(
        order_ref,
        EventDetail::SubscriptionCharged {
            subscription_id: subscription_id.to_string(),
            transaction: TransactionSummary {
                transaction_id: transaction_id.to_string(),
                amount: Money::new("25.00", "USD"),
            },
        },
    )
}

#[tokio::test]
async fn charge_success_marks_processing_order_paid() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Processing);
    order.transaction_id = Some("txn_1".to_string());
    store.insert_order(order);

    let engine = engine_with(store.clone(), HashMap::new());
    let delivered = event(
        Some(order_id),
        EventDetail::ChargeSucceeded {
            transaction_id: "txn_1".to_string(),
            amount: Money::new("10.00", "USD"),
        },
    );

    let disposition = engine.process_event(&delivered).await.expect("process");
    assert_eq!(
        disposition,
        WebhookDisposition::Applied {
            order_id,
            status: PaymentStatus::Paid
        }
    );
    let stored = store.order(order_id);
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.amount.as_deref(), Some("10.00"));
    assert_eq!(store.record_count(), 1);
}

#[tokio::test]
async fn same_event_twice_applies_once() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Active);
    order.subscription_id = Some("sub_1".to_string());
    store.insert_order(order);

    let engine = engine_with(store.clone(), HashMap::new());
    let delivered = charge("sub_1", "txn_7", Some(order_id));

    let first = engine.process_event(&delivered).await.expect("first");
    assert_eq!(
        first,
        WebhookDisposition::Applied {
            order_id,
            status: PaymentStatus::Active
        }
    );
    let second = engine.process_event(&delivered).await.expect("second");
    assert_eq!(
        second,
        WebhookDisposition::Acknowledged {
            reason: AckReason::AlreadyRecorded
        }
    );

    // one history entry, status still Active
    assert_eq!(store.record_count(), 1);
    assert_eq!(store.order(order_id).payment_status, PaymentStatus::Active);
}

#[tokio::test]
async fn out_of_order_charge_after_cancel_keeps_cancelled_status() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Active);
    order.subscription_id = Some("sub_1".to_string());
    store.insert_order(order);

    let engine = engine_with(store.clone(), HashMap::new());

    let cancel = event(
        Some(order_id),
        EventDetail::SubscriptionCanceled {
            subscription_id: "sub_1".to_string(),
        },
    );
    engine.process_event(&cancel).await.expect("cancel");
    assert_eq!(
        store.order(order_id).payment_status,
        PaymentStatus::Cancelled
    );

    // A charge emitted before the cancellation arrives afterwards.
    let late_charge = charge("sub_1", "txn_late", Some(order_id));
    let disposition = engine.process_event(&late_charge).await.expect("late");
    assert_eq!(
        disposition,
        WebhookDisposition::Applied {
            order_id,
            status: PaymentStatus::Cancelled
        }
    );
    assert_eq!(
        store.order(order_id).payment_status,
        PaymentStatus::Cancelled
    );
    // the payment history still records the charge
    assert_eq!(store.record_count(), 1);
}

#[tokio::test]
async fn activation_webhook_after_checkout_is_noop_on_status() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Active);
    order.subscription_id = Some("sub_1".to_string());
    store.insert_order(order);

    let engine = engine_with(store.clone(), HashMap::new());
    let activation = event(
        Some(order_id),
        EventDetail::SubscriptionActivated {
            subscription_id: "sub_1".to_string(),
            first_transaction: None,
        },
    );

    let disposition = engine.process_event(&activation).await.expect("activate");
    assert_eq!(
        disposition,
        WebhookDisposition::Acknowledged {
            reason: AckReason::AlreadyRecorded
        }
    );
    assert_eq!(store.order(order_id).payment_status, PaymentStatus::Active);
    assert!(!store.notes.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn ownership_mismatch_is_passed_through_untouched() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Active);
    order.subscription_id = Some("sub_1".to_string());
    store.insert_order(order);

    let engine = engine_with(store.clone(), HashMap::new());
    // The event's embedded metadata names a different order.
    let foreign = charge("sub_1", "txn_foreign", Some(Uuid::new_v4()));

    let disposition = engine.process_event(&foreign).await.expect("foreign");
    assert_eq!(
        disposition,
        WebhookDisposition::Acknowledged {
            reason: AckReason::OwnershipMismatch
        }
    );
    assert_eq!(store.order(order_id).payment_status, PaymentStatus::Active);
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn metadata_fetched_from_gateway_when_payload_lacks_it() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Active);
    order.subscription_id = Some("sub_1".to_string());
    store.insert_order(order);

    let metadata = HashMap::from([("sub_1".to_string(), Some(order_id))]);
    let engine = engine_with(store.clone(), metadata);

    let delivered = charge("sub_1", "txn_8", None);
    let disposition = engine.process_event(&delivered).await.expect("process");
    assert_eq!(
        disposition,
        WebhookDisposition::Applied {
            order_id,
            status: PaymentStatus::Active
        }
    );
}

#[tokio::test]
async fn missing_metadata_resolves_to_correlation_not_found() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Active);
    order.subscription_id = Some("sub_1".to_string());
    store.insert_order(order);

    // Gateway-side subscription exists but was created without metadata.
    let metadata = HashMap::from([("sub_1".to_string(), None)]);
    let engine = engine_with(store.clone(), metadata);

    let delivered = charge("sub_1", "txn_9", None);
    let disposition = engine.process_event(&delivered).await.expect("process");
    assert_eq!(
        disposition,
        WebhookDisposition::Acknowledged {
            reason: AckReason::CorrelationNotFound
        }
    );
    assert_eq!(store.record_count(), 0);
}

#[tokio::test]
async fn unknown_correlation_is_benign() {
    let store = Arc::new(MemoryOrderStore::default());
    let engine = engine_with(store.clone(), HashMap::new());

    let delivered = charge("sub_unknown", "txn_1", None);
    let disposition = engine.process_event(&delivered).await.expect("process");
    assert_eq!(
        disposition,
        WebhookDisposition::Acknowledged {
            reason: AckReason::CorrelationNotFound
        }
    );
}

#[tokio::test]
async fn unrecognized_event_records_note_only() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Active);
    order.subscription_id = Some("sub_1".to_string());
    store.insert_order(order);

    let engine = engine_with(store.clone(), HashMap::new());
    let delivered = event(
        Some(order_id),
        EventDetail::Unrecognized {
            kind: "subscription_trial_ended".to_string(),
            subject_id: Some("sub_1".to_string()),
        },
    );

    let disposition = engine.process_event(&delivered).await.expect("process");
    assert_eq!(
        disposition,
        WebhookDisposition::Acknowledged {
            reason: AckReason::AlreadyRecorded
        }
    );
    assert_eq!(store.order(order_id).payment_status, PaymentStatus::Active);
    assert_eq!(store.record_count(), 0);
    let notes = store.notes.lock().expect("lock");
    assert!(notes
        .iter()
        .any(|(_, note)| note.contains("subscription_trial_ended")));
}

#[tokio::test]
async fn precondition_mismatch_is_acknowledged_not_applied() {
    let store = Arc::new(MemoryOrderStore::default());
    let order_id = Uuid::new_v4();
    let mut order = order_fixture(order_id, PaymentStatus::Failed);
    order.transaction_id = Some("txn_1".to_string());
    store.insert_order(order);

    let engine = engine_with(store.clone(), HashMap::new());
    let delivered = event(
        Some(order_id),
        EventDetail::ChargeSucceeded {
            transaction_id: "txn_1".to_string(),
            amount: Money::new("10.00", "USD"),
        },
    );

    let disposition = engine.process_event(&delivered).await.expect("process");
    assert_eq!(
        disposition,
        WebhookDisposition::Acknowledged {
            reason: AckReason::PreconditionMismatch
        }
    );
    assert_eq!(store.order(order_id).payment_status, PaymentStatus::Failed);
}
