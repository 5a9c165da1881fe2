use crate::gateway::types::Money;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Lifecycle notifications emitted once per applied reconciliation outcome.
/// Collaborators (confirmation pages, outbound webhooks, entry notes)
/// subscribe through [`OrderHook`].
#[derive(Debug, Clone)]
pub enum OrderNotification {
    PaymentCompleted {
        order_id: Uuid,
        transaction_id: String,
        amount: Money,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    SubscriptionStarted {
        order_id: Uuid,
        subscription_id: String,
    },
    SubscriptionCanceled {
        order_id: Uuid,
        subscription_id: String,
    },
    SubscriptionExpired {
        order_id: Uuid,
        subscription_id: String,
    },
    RecurringPaymentAdded {
        order_id: Uuid,
        transaction_id: String,
        amount: Money,
    },
    RecurringPaymentFailed {
        order_id: Uuid,
        reason: String,
    },
}

#[async_trait]
pub trait OrderHook: Send + Sync {
    async fn notify(&self, notification: &OrderNotification);
}

/// Default hook: structured log lines only.
pub struct LoggingHook;

#[async_trait]
impl OrderHook for LoggingHook {
    async fn notify(&self, notification: &OrderNotification) {
        match notification {
            OrderNotification::PaymentCompleted {
                order_id,
                transaction_id,
                amount,
            } => {
                info!(
                    order_id = %order_id,
                    transaction_id = %transaction_id,
                    amount = %amount.amount,
                    currency = %amount.currency,
                    "order payment completed"
                );
            }
            OrderNotification::PaymentFailed { order_id, reason } => {
                error!(order_id = %order_id, reason = %reason, "order payment failed");
            }
            OrderNotification::SubscriptionStarted {
                order_id,
                subscription_id,
            } => {
                info!(
                    order_id = %order_id,
                    subscription_id = %subscription_id,
                    "subscription started"
                );
            }
            OrderNotification::SubscriptionCanceled {
                order_id,
                subscription_id,
            } => {
                info!(
                    order_id = %order_id,
                    subscription_id = %subscription_id,
                    "subscription canceled"
                );
            }
            OrderNotification::SubscriptionExpired {
                order_id,
                subscription_id,
            } => {
                info!(
                    order_id = %order_id,
                    subscription_id = %subscription_id,
                    "subscription expired"
                );
            }
            OrderNotification::RecurringPaymentAdded {
                order_id,
                transaction_id,
                amount,
            } => {
                info!(
                    order_id = %order_id,
                    transaction_id = %transaction_id,
                    amount = %amount.amount,
                    "recurring payment added"
                );
            }
            OrderNotification::RecurringPaymentFailed { order_id, reason } => {
                info!(order_id = %order_id, reason = %reason, "recurring payment failed");
            }
        }
    }
}

#[derive(Default)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn OrderHook>>,
}

impl HookDispatcher {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn register(mut self, hook: Arc<dyn OrderHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub async fn dispatch(&self, notification: OrderNotification) {
        for hook in &self.hooks {
            hook.notify(&notification).await;
        }
    }
}
