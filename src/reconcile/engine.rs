//! Drives mapper, state machine, and store for each decoded webhook event.
//!
//! History records and the subscription id are persisted before the status
//! flip: both are idempotent writes (unique keys, write-once column), so a
//! crash or a lost race between the two steps is repaired by the gateway's
//! redelivery rather than compounding into duplicates.

use crate::database::error::DatabaseError;
use crate::database::order_store::{
    NewPaymentRecord, Order, OrderPatch, OrderStore, PaymentRecordKind, TransitionResult,
};
use crate::gateway::error::GatewayError;
use crate::gateway::types::GatewayEvent;
use crate::reconcile::mapper::{EventMapper, MapperError, Resolution};
use crate::reconcile::state::{self, Outcome, PaymentStatus, SideEffect};
use crate::services::notification::{HookDispatcher, OrderNotification};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_TRANSITION_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("store error: {0}")]
    Store(#[from] DatabaseError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("order {order_id} contended through {attempts} transition attempts")]
    Contention { order_id: Uuid, attempts: u32 },
}

impl From<MapperError> for ReconcileError {
    fn from(err: MapperError) -> Self {
        match err {
            MapperError::Store(e) => ReconcileError::Store(e),
            MapperError::Gateway(e) => ReconcileError::Gateway(e),
        }
    }
}

/// Business outcome of one webhook delivery, distinct from the transport
/// acknowledgment the ingress derives from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    Applied {
        order_id: Uuid,
        status: PaymentStatus,
    },
    Acknowledged {
        reason: AckReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckReason {
    /// No order correlates; benign for foreign/legacy events.
    CorrelationNotFound,
    /// Ownership check failed; the event belongs to another integration.
    OwnershipMismatch,
    /// The order's current status disallows the transition.
    PreconditionMismatch,
    /// Everything the event carries was already recorded.
    AlreadyRecorded,
}

pub struct ReconciliationEngine {
    store: Arc<dyn OrderStore>,
    mapper: EventMapper,
    hooks: Arc<HookDispatcher>,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        mapper: EventMapper,
        hooks: Arc<HookDispatcher>,
    ) -> Self {
        Self {
            store,
            mapper,
            hooks,
        }
    }

    pub async fn process_event(
        &self,
        event: &GatewayEvent,
    ) -> Result<WebhookDisposition, ReconcileError> {
        let order = match self.mapper.resolve(event).await? {
            Resolution::Matched(order) => order,
            Resolution::NotFound { kind, subject_id } => {
                info!(
                    kind = %kind,
                    subject_id = %subject_id.as_deref().unwrap_or("-"),
                    "event does not correlate to an order, acknowledged"
                );
                return Ok(WebhookDisposition::Acknowledged {
                    reason: AckReason::CorrelationNotFound,
                });
            }
            Resolution::NotOurs {
                order_id,
                subject_id,
            } => {
                info!(
                    order_id = %order_id,
                    subject_id = %subject_id,
                    "event ownership mismatch, passed through"
                );
                return Ok(WebhookDisposition::Acknowledged {
                    reason: AckReason::OwnershipMismatch,
                });
            }
        };

        self.apply_to_order(order, event).await
    }

    async fn apply_to_order(
        &self,
        mut order: Order,
        event: &GatewayEvent,
    ) -> Result<WebhookDisposition, ReconcileError> {
        for attempt in 0..MAX_TRANSITION_ATTEMPTS {
            match state::apply(order.payment_status, event) {
                Outcome::Rejected { reason } => {
                    warn!(
                        order_id = %order.order_id,
                        event_id = %event.event_id,
                        "transition refused: {}",
                        reason
                    );
                    self.store
                        .record_note(order.order_id, &format!("Webhook ignored: {}.", reason))
                        .await?;
                    return Ok(WebhookDisposition::Acknowledged {
                        reason: AckReason::PreconditionMismatch,
                    });
                }

                Outcome::Unchanged { effects } => {
                    let recorded = self.persist_history(&order, &effects, event).await?;
                    self.write_notes(&order, &effects).await?;
                    if recorded {
                        self.refresh_last_transaction(&order, &effects).await?;
                        self.dispatch_record_hooks(&order, &effects).await;
                        return Ok(WebhookDisposition::Applied {
                            order_id: order.order_id,
                            status: order.payment_status,
                        });
                    }
                    return Ok(WebhookDisposition::Acknowledged {
                        reason: AckReason::AlreadyRecorded,
                    });
                }

                Outcome::Transition {
                    next_status,
                    effects,
                } => {
                    self.persist_history(&order, &effects, event).await?;
                    let patch = build_patch(&effects);
                    match self
                        .store
                        .transition(order.order_id, order.payment_status, next_status, patch)
                        .await?
                    {
                        TransitionResult::Updated(updated) => {
                            info!(
                                order_id = %updated.order_id,
                                from = %order.payment_status,
                                to = %next_status,
                                event_id = %event.event_id,
                                "order status transitioned"
                            );
                            self.write_notes(&updated, &effects).await?;
                            self.dispatch_transition_hooks(&updated, &effects).await;
                            return Ok(WebhookDisposition::Applied {
                                order_id: updated.order_id,
                                status: next_status,
                            });
                        }
                        TransitionResult::Conflict { current } => {
                            warn!(
                                order_id = %order.order_id,
                                expected = %order.payment_status,
                                observed = %current.map(|s| s.as_str()).unwrap_or("missing"),
                                attempt = attempt + 1,
                                "concurrent order update, re-reading"
                            );
                            match self.store.get(order.order_id).await? {
                                Some(reloaded) => {
                                    order = reloaded;
                                    continue;
                                }
                                None => {
                                    return Ok(WebhookDisposition::Acknowledged {
                                        reason: AckReason::CorrelationNotFound,
                                    })
                                }
                            }
                        }
                    }
                }
            }
        }

        Err(ReconcileError::Contention {
            order_id: order.order_id,
            attempts: MAX_TRANSITION_ATTEMPTS,
        })
    }

    /// Apply the idempotent persistence a set of effects calls for: history
    /// appends (unique-keyed) and the write-once subscription id. Returns
    /// whether any history entry was newly inserted.
    async fn persist_history(
        &self,
        order: &Order,
        effects: &[SideEffect],
        event: &GatewayEvent,
    ) -> Result<bool, ReconcileError> {
        let mut inserted = false;
        for effect in effects {
            match effect {
                SideEffect::StartSubscription {
                    subscription_id,
                    first_transaction,
                } => {
                    let accepted = self
                        .store
                        .set_subscription_id(order.order_id, subscription_id)
                        .await?;
                    if !accepted {
                        warn!(
                            order_id = %order.order_id,
                            subscription_id = %subscription_id,
                            "order already carries a different subscription id"
                        );
                    }
                    if let Some(txn) = first_transaction {
                        inserted |= self
                            .store
                            .append_payment_record(NewPaymentRecord {
                                order_id: order.order_id,
                                kind: PaymentRecordKind::InitialPayment,
                                reference: txn.transaction_id.clone(),
                                amount: Some(txn.amount.clone()),
                                note: None,
                            })
                            .await?;
                    }
                }
                SideEffect::MarkPaid {
                    transaction_id,
                    amount,
                } => {
                    inserted |= self
                        .store
                        .append_payment_record(NewPaymentRecord {
                            order_id: order.order_id,
                            kind: PaymentRecordKind::InitialPayment,
                            reference: transaction_id.clone(),
                            amount: Some(amount.clone()),
                            note: None,
                        })
                        .await?;
                }
                SideEffect::RecordRecurringPayment { transaction } => {
                    inserted |= self
                        .store
                        .append_payment_record(NewPaymentRecord {
                            order_id: order.order_id,
                            kind: PaymentRecordKind::RecurringPayment,
                            reference: transaction.transaction_id.clone(),
                            amount: Some(transaction.amount.clone()),
                            note: None,
                        })
                        .await?;
                }
                SideEffect::RecordRecurringFailure { reason } => {
                    inserted |= self
                        .store
                        .append_payment_record(NewPaymentRecord {
                            order_id: order.order_id,
                            kind: PaymentRecordKind::RecurringFailure,
                            reference: event.event_id.clone(),
                            amount: None,
                            note: Some(reason.clone()),
                        })
                        .await?;
                }
                SideEffect::MarkFailed { .. }
                | SideEffect::CancelSubscription { .. }
                | SideEffect::ExpireSubscription { .. }
                | SideEffect::RecordNote { .. } => {}
            }
        }
        Ok(inserted)
    }

    /// Recurring charges update the order's last transaction id and amount
    /// while the order is still active; losing the race against a
    /// cancellation is fine, the history row already landed.
    async fn refresh_last_transaction(
        &self,
        order: &Order,
        effects: &[SideEffect],
    ) -> Result<(), ReconcileError> {
        if order.payment_status != PaymentStatus::Active {
            return Ok(());
        }
        for effect in effects {
            if let SideEffect::RecordRecurringPayment { transaction } = effect {
                let patch = OrderPatch {
                    transaction_id: Some(transaction.transaction_id.clone()),
                    amount: Some(transaction.amount.clone()),
                    ..Default::default()
                };
                let _ = self
                    .store
                    .transition(
                        order.order_id,
                        PaymentStatus::Active,
                        PaymentStatus::Active,
                        patch,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn write_notes(
        &self,
        order: &Order,
        effects: &[SideEffect],
    ) -> Result<(), ReconcileError> {
        for effect in effects {
            if let SideEffect::RecordNote { note } = effect {
                self.store.record_note(order.order_id, note).await?;
            }
        }
        Ok(())
    }

    async fn dispatch_transition_hooks(&self, order: &Order, effects: &[SideEffect]) {
        for effect in effects {
            let notification = match effect {
                SideEffect::MarkPaid {
                    transaction_id,
                    amount,
                } => Some(OrderNotification::PaymentCompleted {
                    order_id: order.order_id,
                    transaction_id: transaction_id.clone(),
                    amount: amount.clone(),
                }),
                SideEffect::MarkFailed { reason } => Some(OrderNotification::PaymentFailed {
                    order_id: order.order_id,
                    reason: reason.clone(),
                }),
                SideEffect::StartSubscription {
                    subscription_id, ..
                } => Some(OrderNotification::SubscriptionStarted {
                    order_id: order.order_id,
                    subscription_id: subscription_id.clone(),
                }),
                SideEffect::CancelSubscription { subscription_id } => {
                    Some(OrderNotification::SubscriptionCanceled {
                        order_id: order.order_id,
                        subscription_id: subscription_id.clone(),
                    })
                }
                SideEffect::ExpireSubscription { subscription_id } => {
                    Some(OrderNotification::SubscriptionExpired {
                        order_id: order.order_id,
                        subscription_id: subscription_id.clone(),
                    })
                }
                _ => None,
            };
            if let Some(notification) = notification {
                self.hooks.dispatch(notification).await;
            }
        }
    }

    async fn dispatch_record_hooks(&self, order: &Order, effects: &[SideEffect]) {
        for effect in effects {
            let notification = match effect {
                SideEffect::RecordRecurringPayment { transaction } => {
                    Some(OrderNotification::RecurringPaymentAdded {
                        order_id: order.order_id,
                        transaction_id: transaction.transaction_id.clone(),
                        amount: transaction.amount.clone(),
                    })
                }
                SideEffect::RecordRecurringFailure { reason } => {
                    Some(OrderNotification::RecurringPaymentFailed {
                        order_id: order.order_id,
                        reason: reason.clone(),
                    })
                }
                _ => None,
            };
            if let Some(notification) = notification {
                self.hooks.dispatch(notification).await;
            }
        }
    }
}

fn build_patch(effects: &[SideEffect]) -> OrderPatch {
    let mut patch = OrderPatch::default();
    for effect in effects {
        match effect {
            SideEffect::MarkPaid {
                transaction_id,
                amount,
            } => {
                patch.transaction_id = Some(transaction_id.clone());
                patch.amount = Some(amount.clone());
            }
            SideEffect::MarkFailed { reason } => {
                patch.failure_reason = Some(reason.clone());
            }
            SideEffect::StartSubscription {
                first_transaction, ..
            } => {
                if let Some(txn) = first_transaction {
                    patch.transaction_id = Some(txn.transaction_id.clone());
                    patch.amount = Some(txn.amount.clone());
                }
            }
            _ => {}
        }
    }
    patch
}
