//! In-memory store implementations for tests.

use crate::database::error::DatabaseError;
use crate::database::customer_vault_repository::CustomerVaultStore;
use crate::database::order_store::{
    NewOrder, NewPaymentRecord, Order, OrderPatch, OrderStore, TransitionResult,
};
use crate::reconcile::state::PaymentStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub fn order_fixture(order_id: Uuid, status: PaymentStatus) -> Order {
    Order {
        order_id,
        gateway: "braintree".to_string(),
        payment_status: status,
        transaction_id: None,
        subscription_id: None,
        amount: None,
        currency: None,
        customer_ref: None,
        plan_ref: None,
        failure_reason: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    pub orders: Mutex<HashMap<Uuid, Order>>,
    pub records: Mutex<Vec<NewPaymentRecord>>,
    pub notes: Mutex<Vec<(Uuid, String)>>,
}

impl MemoryOrderStore {
    pub fn insert_order(&self, order: Order) {
        self.orders
            .lock()
            .expect("lock")
            .insert(order.order_id, order);
    }

    pub fn order(&self, order_id: Uuid) -> Order {
        self.orders
            .lock()
            .expect("lock")
            .get(&order_id)
            .cloned()
            .expect("order exists")
    }

    pub fn single_order(&self) -> Order {
        let orders = self.orders.lock().expect("lock");
        assert_eq!(orders.len(), 1, "expected exactly one order");
        orders.values().next().cloned().expect("order exists")
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().expect("lock").len()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        let created = Order {
            gateway: order.gateway.as_str().to_string(),
            amount: order.amount.as_ref().map(|m| m.amount.clone()),
            currency: order.amount.as_ref().map(|m| m.currency.clone()),
            plan_ref: order.plan_ref,
            ..order_fixture(order.order_id, PaymentStatus::Processing)
        };
        self.insert_order(created.clone());
        Ok(created)
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, DatabaseError> {
        Ok(self.orders.lock().expect("lock").get(&order_id).cloned())
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        Ok(self
            .orders
            .lock()
            .expect("lock")
            .values()
            .find(|o| {
                o.transaction_id.as_deref() == Some(reference)
                    || o.subscription_id.as_deref() == Some(reference)
            })
            .cloned())
    }

    async fn transition(
        &self,
        order_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        patch: OrderPatch,
    ) -> Result<TransitionResult, DatabaseError> {
        let mut orders = self.orders.lock().expect("lock");
        let Some(order) = orders.get_mut(&order_id) else {
            return Ok(TransitionResult::Conflict { current: None });
        };
        if order.payment_status != expected {
            return Ok(TransitionResult::Conflict {
                current: Some(order.payment_status),
            });
        }
        order.payment_status = next;
        if let Some(txn) = patch.transaction_id {
            order.transaction_id = Some(txn);
        }
        if let Some(amount) = patch.amount {
            order.amount = Some(amount.amount);
            order.currency = Some(amount.currency);
        }
        if let Some(reason) = patch.failure_reason {
            order.failure_reason = Some(reason);
        }
        if let Some(customer_ref) = patch.customer_ref {
            order.customer_ref = Some(customer_ref);
        }
        order.updated_at = Utc::now();
        Ok(TransitionResult::Updated(order.clone()))
    }

    async fn set_subscription_id(
        &self,
        order_id: Uuid,
        subscription_id: &str,
    ) -> Result<bool, DatabaseError> {
        let mut orders = self.orders.lock().expect("lock");
        let Some(order) = orders.get_mut(&order_id) else {
            return Ok(false);
        };
        match order.subscription_id.as_deref() {
            None => {
                order.subscription_id = Some(subscription_id.to_string());
                Ok(true)
            }
            Some(existing) => Ok(existing == subscription_id),
        }
    }

    async fn append_payment_record(
        &self,
        record: NewPaymentRecord,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.lock().expect("lock");
        let duplicate = records.iter().any(|r| {
            r.order_id == record.order_id
                && r.kind == record.kind
                && r.reference == record.reference
        });
        if duplicate {
            return Ok(false);
        }
        records.push(record);
        Ok(true)
    }

    async fn record_note(&self, order_id: Uuid, note: &str) -> Result<(), DatabaseError> {
        self.notes
            .lock()
            .expect("lock")
            .push((order_id, note.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCustomerVaultStore {
    pub entries: Mutex<HashMap<(String, String), String>>,
}

#[async_trait]
impl CustomerVaultStore for MemoryCustomerVaultStore {
    async fn get_customer_ref(
        &self,
        gateway: &str,
        email_hash: &str,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .entries
            .lock()
            .expect("lock")
            .get(&(gateway.to_string(), email_hash.to_string()))
            .cloned())
    }

    async fn save_customer_ref(
        &self,
        gateway: &str,
        email_hash: &str,
        customer_ref: &str,
    ) -> Result<(), DatabaseError> {
        self.entries.lock().expect("lock").insert(
            (gateway.to_string(), email_hash.to_string()),
            customer_ref.to_string(),
        );
        Ok(())
    }
}
