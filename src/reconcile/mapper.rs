//! Correlates an inbound gateway event to exactly one local order.
//!
//! Resolution is a lookup by gateway-side id followed by an ownership check
//! against the order id embedded in gateway metadata at creation time. An
//! event that correlates to no order, or whose metadata names a different
//! order, is passed through untouched. Both are expected on shared gateway
//! accounts and neither is an error.

use crate::database::error::DatabaseError;
use crate::database::order_store::{Order, OrderStore};
use crate::gateway::error::{GatewayError, GatewayResult};
use crate::gateway::factory::GatewayFactory;
use crate::gateway::types::{GatewayEvent, GatewayName, SubscriptionDetails};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum Resolution {
    Matched(Order),
    /// No order correlates to the event subject. Benign: expected for
    /// events that belong to other integrations on the same account, and
    /// for orders created before metadata was recorded.
    NotFound {
        kind: String,
        subject_id: Option<String>,
    },
    /// An order matched the lookup key but the gateway-side metadata names
    /// a different order. The event is passed through untouched.
    NotOurs {
        order_id: Uuid,
        subject_id: String,
    },
}

#[derive(Debug, Error)]
pub enum MapperError {
    #[error("store error: {0}")]
    Store(#[from] DatabaseError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Source of gateway-side subscription metadata, consulted when the webhook
/// payload itself does not carry the embedded order id (Stripe invoice
/// events, trimmed Braintree notifications).
#[async_trait]
pub trait SubscriptionMetadataSource: Send + Sync {
    async fn fetch_subscription(
        &self,
        gateway: GatewayName,
        subscription_id: &str,
    ) -> GatewayResult<SubscriptionDetails>;
}

#[async_trait]
impl SubscriptionMetadataSource for GatewayFactory {
    async fn fetch_subscription(
        &self,
        gateway: GatewayName,
        subscription_id: &str,
    ) -> GatewayResult<SubscriptionDetails> {
        self.get_gateway(gateway)?
            .fetch_subscription(subscription_id)
            .await
    }
}

pub struct EventMapper {
    store: Arc<dyn OrderStore>,
    metadata: Arc<dyn SubscriptionMetadataSource>,
}

impl EventMapper {
    pub fn new(
        store: Arc<dyn OrderStore>,
        metadata: Arc<dyn SubscriptionMetadataSource>,
    ) -> Self {
        Self { store, metadata }
    }

    pub async fn resolve(&self, event: &GatewayEvent) -> Result<Resolution, MapperError> {
        let Some(key) = event.correlation_key() else {
            return Ok(Resolution::NotFound {
                kind: event.kind_name().to_string(),
                subject_id: None,
            });
        };

        let Some(order) = self.store.find_by_gateway_reference(key).await? else {
            debug!(
                kind = %event.kind_name(),
                subject_id = %key,
                "no order correlates to event"
            );
            return Ok(Resolution::NotFound {
                kind: event.kind_name().to_string(),
                subject_id: Some(key.to_string()),
            });
        };

        let embedded = match event.order_ref {
            Some(order_ref) => Some(order_ref),
            None if event.is_subscription_event() => {
                self.fetch_embedded_order_ref(event.gateway, key).await?
            }
            None => None,
        };

        match embedded {
            // Metadata never recorded: treated as no correlation, never
            // matched by amount or time.
            None => Ok(Resolution::NotFound {
                kind: event.kind_name().to_string(),
                subject_id: Some(key.to_string()),
            }),
            Some(order_ref) if order_ref == order.order_id => Ok(Resolution::Matched(order)),
            Some(order_ref) => {
                warn!(
                    subject_id = %key,
                    resolved_order = %order.order_id,
                    embedded_order = %order_ref,
                    "event metadata names a different order, passing through"
                );
                Ok(Resolution::NotOurs {
                    order_id: order.order_id,
                    subject_id: key.to_string(),
                })
            }
        }
    }

    async fn fetch_embedded_order_ref(
        &self,
        gateway: GatewayName,
        subscription_id: &str,
    ) -> Result<Option<Uuid>, MapperError> {
        match self.metadata.fetch_subscription(gateway, subscription_id).await {
            Ok(details) => Ok(details.order_ref),
            // A transient fetch failure is surfaced so the ingress answers
            // 5xx and the gateway redelivers; a permanent one means the
            // metadata is unavailable for good.
            Err(err) if err.is_retryable() => Err(MapperError::Gateway(err)),
            Err(err) => {
                warn!(
                    subscription_id = %subscription_id,
                    error = %err,
                    "subscription metadata fetch failed permanently"
                );
                Ok(None)
            }
        }
    }
}
