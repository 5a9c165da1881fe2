use formpay_backend::api::{self, AppState};
use formpay_backend::config::AppConfig;
use formpay_backend::database::customer_vault_repository::PgCustomerVaultStore;
use formpay_backend::database::order_repository::PgOrderStore;
use formpay_backend::database::{init_pool_from_config, order_store::OrderStore};
use formpay_backend::gateway::factory::GatewayFactory;
use formpay_backend::logging::init_tracing;
use formpay_backend::middleware::logging::UuidRequestId;
use formpay_backend::reconcile::engine::ReconciliationEngine;
use formpay_backend::reconcile::mapper::EventMapper;
use formpay_backend::services::checkout::{CheckoutConfig, CheckoutService};
use formpay_backend::services::customer_vault::{CustomerVault, DEFAULT_VAULT_CACHE_TTL};
use formpay_backend::services::notification::{HookDispatcher, LoggingHook};
use formpay_backend::services::plan_cache::PlanCache;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("configuration: {}", e))?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "starting formpay backend service"
    );

    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("failed to initialize database pool: {}", e);
        anyhow::anyhow!("database: {}", e)
    })?;

    let order_store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(pool.clone()));
    let vault_store = Arc::new(PgCustomerVaultStore::new(pool.clone()));

    let gateways = Arc::new(
        GatewayFactory::from_env().map_err(|e| anyhow::anyhow!("gateway config: {}", e))?,
    );
    let plan_cache = Arc::new(PlanCache::new(
        gateways.clone(),
        Duration::from_secs(config.payments.plan_cache_ttl_secs),
    ));
    let vault = Arc::new(CustomerVault::new(vault_store, DEFAULT_VAULT_CACHE_TTL));
    let hooks = Arc::new(HookDispatcher::new().register(Arc::new(LoggingHook)));

    let mapper = EventMapper::new(order_store.clone(), gateways.clone());
    let engine = Arc::new(ReconciliationEngine::new(
        order_store.clone(),
        mapper,
        hooks.clone(),
    ));
    let checkout = Arc::new(CheckoutService::new(
        order_store.clone(),
        gateways.clone(),
        plan_cache.clone(),
        vault,
        hooks.clone(),
        CheckoutConfig {
            vault_enabled: config.payments.vault_enabled,
        },
    ));

    let state = Arc::new(AppState {
        pool,
        store: order_store,
        engine,
        checkout,
        plan_cache,
        gateways,
        hooks,
    });

    let app = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}
