//! TTL-bound cache of the gateway's recurring billing plans.
//!
//! Plans change rarely but are consulted on every dynamic-plan checkout, so
//! they are cached per gateway with a declared TTL and an explicit
//! invalidation trigger (settings save), never as ambient global state.

use crate::gateway::error::GatewayResult;
use crate::gateway::factory::GatewayFactory;
use crate::gateway::types::{GatewayName, Plan};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const DEFAULT_PLAN_CACHE_TTL: Duration = Duration::from_secs(3600);

#[async_trait]
pub trait PlanSource: Send + Sync {
    async fn fetch_plans(&self, gateway: GatewayName) -> GatewayResult<Vec<Plan>>;
}

#[async_trait]
impl PlanSource for GatewayFactory {
    async fn fetch_plans(&self, gateway: GatewayName) -> GatewayResult<Vec<Plan>> {
        self.get_gateway(gateway)?.fetch_plans().await
    }
}

struct CachedPlans {
    plans: Vec<Plan>,
    fetched_at: Instant,
}

pub struct PlanCache {
    source: std::sync::Arc<dyn PlanSource>,
    ttl: Duration,
    inner: RwLock<HashMap<GatewayName, CachedPlans>>,
}

impl PlanCache {
    pub fn new(source: std::sync::Arc<dyn PlanSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_plans(&self, gateway: GatewayName) -> GatewayResult<Vec<Plan>> {
        {
            let cache = self.inner.read().await;
            if let Some(cached) = cache.get(&gateway) {
                if cached.fetched_at.elapsed() < self.ttl {
                    debug!(gateway = %gateway, "serving plans from cache");
                    return Ok(cached.plans.clone());
                }
            }
        }

        let plans = self.source.fetch_plans(gateway).await?;
        let mut cache = self.inner.write().await;
        cache.insert(
            gateway,
            CachedPlans {
                plans: plans.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(plans)
    }

    pub async fn is_valid_plan(&self, gateway: GatewayName, plan_id: &str) -> GatewayResult<bool> {
        let plans = self.get_plans(gateway).await?;
        Ok(plans.iter().any(|p| p.id == plan_id))
    }

    /// Invalidation trigger: called when gateway settings change.
    pub async fn invalidate(&self, gateway: GatewayName) {
        info!(gateway = %gateway, "plan cache invalidated");
        self.inner.write().await.remove(&gateway);
    }

    pub async fn invalidate_all(&self) {
        info!("plan cache cleared");
        self.inner.write().await.clear();
    }
}
