use crate::database::error::DatabaseError;
use async_trait::async_trait;
use sqlx::PgPool;

/// Persisted mapping from a hashed customer email to a gateway-side customer
/// profile, used to reuse vaulted payment profiles across submissions.
#[async_trait]
pub trait CustomerVaultStore: Send + Sync {
    async fn get_customer_ref(
        &self,
        gateway: &str,
        email_hash: &str,
    ) -> Result<Option<String>, DatabaseError>;

    async fn save_customer_ref(
        &self,
        gateway: &str,
        email_hash: &str,
        customer_ref: &str,
    ) -> Result<(), DatabaseError>;
}

pub struct PgCustomerVaultStore {
    pool: PgPool,
}

impl PgCustomerVaultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CustomerVaultStore for PgCustomerVaultStore {
    async fn get_customer_ref(
        &self,
        gateway: &str,
        email_hash: &str,
    ) -> Result<Option<String>, DatabaseError> {
        sqlx::query_scalar::<_, String>(
            "SELECT customer_ref FROM customer_vault WHERE gateway = $1 AND email_hash = $2",
        )
        .bind(gateway)
        .bind(email_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn save_customer_ref(
        &self,
        gateway: &str,
        email_hash: &str,
        customer_ref: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO customer_vault (gateway, email_hash, customer_ref) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (gateway, email_hash) DO UPDATE \
             SET customer_ref = EXCLUDED.customer_ref, updated_at = NOW()",
        )
        .bind(gateway)
        .bind(email_hash)
        .bind(customer_ref)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}
