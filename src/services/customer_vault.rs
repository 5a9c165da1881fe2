//! Vaulted gateway customer lookup.
//!
//! Maps a hashed customer email to the gateway-side customer profile created
//! on a previous submission, so repeat subscribers do not accumulate
//! duplicate gateway customers. The persistent mapping lives in the store; a
//! small TTL cache sits in front of it.

use crate::database::customer_vault_repository::CustomerVaultStore;
use crate::database::error::DatabaseError;
use crate::gateway::types::GatewayName;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const DEFAULT_VAULT_CACHE_TTL: Duration = Duration::from_secs(900);

/// Stable lookup key: SHA-256 of the trimmed, lowercased email.
pub fn hash_email(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

struct CachedRef {
    customer_ref: String,
    cached_at: Instant,
}

pub struct CustomerVault {
    store: Arc<dyn CustomerVaultStore>,
    ttl: Duration,
    cache: RwLock<HashMap<(GatewayName, String), CachedRef>>,
}

impl CustomerVault {
    pub fn new(store: Arc<dyn CustomerVaultStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn lookup(
        &self,
        gateway: GatewayName,
        email: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let email_hash = hash_email(email);
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&(gateway, email_hash.clone())) {
                if cached.cached_at.elapsed() < self.ttl {
                    return Ok(Some(cached.customer_ref.clone()));
                }
            }
        }

        let found = self
            .store
            .get_customer_ref(gateway.as_str(), &email_hash)
            .await?;
        if let Some(customer_ref) = &found {
            self.cache.write().await.insert(
                (gateway, email_hash),
                CachedRef {
                    customer_ref: customer_ref.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
        Ok(found)
    }

    pub async fn remember(
        &self,
        gateway: GatewayName,
        email: &str,
        customer_ref: &str,
    ) -> Result<(), DatabaseError> {
        let email_hash = hash_email(email);
        self.store
            .save_customer_ref(gateway.as_str(), &email_hash, customer_ref)
            .await?;
        self.cache.write().await.insert(
            (gateway, email_hash),
            CachedRef {
                customer_ref: customer_ref.to_string(),
                cached_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Invalidation trigger: called when gateway settings change.
    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }
}
