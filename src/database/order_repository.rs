use crate::database::error::DatabaseError;
use crate::database::order_store::{
    NewOrder, NewPaymentRecord, Order, OrderPatch, OrderStore, TransitionResult,
};
use crate::reconcile::state::PaymentStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "order_id, gateway, payment_status, transaction_id, subscription_id, \
     amount, currency, customer_ref, plan_ref, failure_reason, created_at, updated_at";

/// Postgres-backed order store.
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    order_id: Uuid,
    gateway: String,
    payment_status: String,
    transaction_id: Option<String>,
    subscription_id: Option<String>,
    amount: Option<String>,
    currency: Option<String>,
    customer_ref: Option<String>,
    plan_ref: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self) -> Result<Order, DatabaseError> {
        let payment_status =
            PaymentStatus::from_str(&self.payment_status).map_err(|_| DatabaseError::Query {
                message: format!(
                    "order {} has unknown payment status '{}'",
                    self.order_id, self.payment_status
                ),
            })?;
        Ok(Order {
            order_id: self.order_id,
            gateway: self.gateway,
            payment_status,
            transaction_id: self.transaction_id,
            subscription_id: self.subscription_id,
            amount: self.amount,
            currency: self.currency,
            customer_ref: self.customer_ref,
            plan_ref: self.plan_ref,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create(&self, order: NewOrder) -> Result<Order, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (order_id, gateway, payment_status, amount, currency, plan_ref) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order.order_id)
        .bind(order.gateway.as_str())
        .bind(PaymentStatus::Processing.as_str())
        .bind(order.amount.as_ref().map(|m| m.amount.clone()))
        .bind(order.amount.as_ref().map(|m| m.currency.clone()))
        .bind(order.plan_ref)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.into_order()
    }

    async fn get(&self, order_id: Uuid) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(OrderRow::into_order).transpose()
    }

    async fn find_by_gateway_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders \
             WHERE transaction_id = $1 OR subscription_id = $1 \
             LIMIT 1",
            ORDER_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(OrderRow::into_order).transpose()
    }

    async fn transition(
        &self,
        order_id: Uuid,
        expected: PaymentStatus,
        next: PaymentStatus,
        patch: OrderPatch,
    ) -> Result<TransitionResult, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders \
             SET payment_status = $3, \
                 transaction_id = COALESCE($4, transaction_id), \
                 amount = COALESCE($5, amount), \
                 currency = COALESCE($6, currency), \
                 failure_reason = COALESCE($7, failure_reason), \
                 customer_ref = COALESCE($8, customer_ref), \
                 updated_at = NOW() \
             WHERE order_id = $1 AND payment_status = $2 \
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(patch.transaction_id)
        .bind(patch.amount.as_ref().map(|m| m.amount.clone()))
        .bind(patch.amount.as_ref().map(|m| m.currency.clone()))
        .bind(patch.failure_reason)
        .bind(patch.customer_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        match row {
            Some(row) => Ok(TransitionResult::Updated(row.into_order()?)),
            None => {
                let current = self.get(order_id).await?.map(|o| o.payment_status);
                Ok(TransitionResult::Conflict { current })
            }
        }
    }

    async fn set_subscription_id(
        &self,
        order_id: Uuid,
        subscription_id: &str,
    ) -> Result<bool, DatabaseError> {
        let updated = sqlx::query(
            "UPDATE orders \
             SET subscription_id = $2, updated_at = NOW() \
             WHERE order_id = $1 \
               AND (subscription_id IS NULL OR subscription_id = $2)",
        )
        .bind(order_id)
        .bind(subscription_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(updated.rows_affected() > 0)
    }

    async fn append_payment_record(
        &self,
        record: NewPaymentRecord,
    ) -> Result<bool, DatabaseError> {
        let inserted = sqlx::query(
            "INSERT INTO payment_records (order_id, kind, reference, amount, currency, note) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (order_id, kind, reference) DO NOTHING",
        )
        .bind(record.order_id)
        .bind(record.kind.as_str())
        .bind(record.reference)
        .bind(record.amount.as_ref().map(|m| m.amount.clone()))
        .bind(record.amount.as_ref().map(|m| m.currency.clone()))
        .bind(record.note)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(inserted.rows_affected() > 0)
    }

    async fn record_note(&self, order_id: Uuid, note: &str) -> Result<(), DatabaseError> {
        sqlx::query("INSERT INTO order_notes (order_id, note) VALUES ($1, $2)")
            .bind(order_id)
            .bind(note)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
