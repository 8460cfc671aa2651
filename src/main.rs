use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use dotenv::dotenv;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use reelpass_backend::api;
use reelpass_backend::catalog::ItemResolver;
use reelpass_backend::config::AppConfig;
use reelpass_backend::currency::{CurrencyConverter, RateTable};
use reelpass_backend::database;
use reelpass_backend::database::memory::MemoryStore;
use reelpass_backend::database::repository::{
    CatalogStore, DiscountLedger, OrderLedger, PurchaseAudit, WalletLedger,
};
use reelpass_backend::gateway::flutterwave::FlutterwaveVerifier;
use reelpass_backend::gateway::{GatewayError, PaymentVerifier};
use reelpass_backend::health::{HealthChecker, HealthStatus};
use reelpass_backend::logging::init_tracing;
use reelpass_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use reelpass_backend::services::{
    EntitlementService, LogNotifier, PurchaseService, StreamSigner, StreamingService,
};
use reelpass_backend::workers::reconciliation::{ReconcilerConfig, ReconciliationWorker};

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

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

/// The five storage ports every service is wired against. Backed by Postgres
/// adapters when DATABASE_URL is set, by one shared in-memory store otherwise.
struct StoragePorts {
    catalog: Arc<dyn CatalogStore>,
    wallets: Arc<dyn WalletLedger>,
    orders: Arc<dyn OrderLedger>,
    discounts: Arc<dyn DiscountLedger>,
    audit: Arc<dyn PurchaseAudit>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;

    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting ReelPass backend service"
    );

    info!(
        host = %config.server.host,
        port = config.server.port,
        default_currency = %config.currency.default_currency,
        "Server configuration loaded"
    );

    let converter = Arc::new(CurrencyConverter::new(RateTable::from_env()));
    info!(
        supported = ?converter.table().supported(),
        "💱 Exchange rate table loaded"
    );

    // Storage: Postgres when configured, the in-memory store otherwise.
    let (db_pool, ports) = match &config.database {
        Some(db_config) => {
            info!("📊 Initializing database connection pool...");
            let pool = database::init_pool_from_config(db_config).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            database::run_migrations(&pool).await?;
            info!(
                max_connections = db_config.max_connections,
                "✅ Database connection pool initialized"
            );

            let ports = StoragePorts {
                catalog: Arc::new(database::catalog_repository::PgCatalogStore::new(
                    pool.clone(),
                )),
                wallets: Arc::new(database::wallet_repository::PgWalletLedger::new(
                    pool.clone(),
                    Arc::clone(&converter),
                )),
                orders: Arc::new(database::order_repository::PgOrderLedger::new(pool.clone())),
                discounts: Arc::new(database::discount_repository::PgDiscountLedger::new(
                    pool.clone(),
                )),
                audit: Arc::new(database::audit_repository::PgPurchaseAudit::new(
                    pool.clone(),
                )),
            };
            (Some(pool), ports)
        }
        None => {
            info!("⏭️  DATABASE_URL not set; running on the in-memory store");
            let store = Arc::new(MemoryStore::new(Arc::clone(&converter)));
            let ports = StoragePorts {
                catalog: store.clone(),
                wallets: store.clone(),
                orders: store.clone(),
                discounts: store.clone(),
                audit: store,
            };
            (None, ports)
        }
    };

    // Card gateway verifier. Missing credentials disable card purchases and
    // top-ups; wallet purchases keep working.
    let verifier: Option<Arc<dyn PaymentVerifier>> = match FlutterwaveVerifier::from_env() {
        Ok(v) => {
            info!(gateway = v.name(), "💳 Card gateway verifier initialized");
            Some(Arc::new(v))
        }
        Err(GatewayError::Unconfigured) => {
            info!("⏭️  FLUTTERWAVE_SECRET_KEY not set; card verification disabled");
            None
        }
        Err(e) => {
            error!("❌ Failed to initialize card gateway verifier: {}", e);
            return Err(e.into());
        }
    };
    let gateway_configured = verifier.is_some();

    let resolver = ItemResolver::new(Arc::clone(&ports.catalog));
    let purchases = PurchaseService::new(
        resolver.clone(),
        Arc::clone(&ports.wallets),
        Arc::clone(&ports.orders),
        Arc::clone(&ports.discounts),
        Arc::clone(&ports.audit),
        verifier,
        Arc::new(LogNotifier::new()),
    );
    let entitlement = EntitlementService::new(resolver.clone(), Arc::clone(&ports.orders));
    let signer = StreamSigner::new(
        config.streaming.signing_secret.clone(),
        config.streaming.base_url.clone(),
        config.streaming.url_ttl_secs,
    );
    let streaming = StreamingService::new(entitlement.clone(), Arc::clone(&ports.orders), signer);

    info!("🏥 Initializing health checker...");
    let health_checker = HealthChecker::new(db_pool.clone(), gateway_configured);
    info!("✅ Health checker initialized");

    // Reconciliation worker: finishes entitlement writes for purchases that
    // paid but failed before their order landed.
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let reconciler_enabled = std::env::var("RECONCILER_ENABLED")
        .unwrap_or_else(|_| "true".to_string())
        .to_lowercase()
        != "false";
    let mut reconciler_handle = None;
    if reconciler_enabled {
        let worker_config = ReconcilerConfig::from_env();
        info!(
            sweep_interval_secs = worker_config.sweep_interval.as_secs(),
            batch_size = worker_config.batch_size,
            "Starting purchase reconciliation worker"
        );
        let worker = ReconciliationWorker::new(
            resolver.clone(),
            Arc::clone(&ports.orders),
            Arc::clone(&ports.audit),
            worker_config,
        );
        reconciler_handle = Some(tokio::spawn(worker.run(worker_shutdown_rx)));
    } else {
        info!("Purchase reconciliation worker disabled (RECONCILER_ENABLED=false)");
    }

    info!("🛣️  Setting up application routes...");

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker });

    let default_currency = config.currency.default_currency;
    let app = Router::new()
        .route("/", get(root))
        .merge(health_routes)
        .merge(api::purchase::router(api::purchase::PurchaseState {
            purchases: purchases.clone(),
            default_currency,
        }))
        .merge(api::wallet::router(api::wallet::WalletState {
            wallets: Arc::clone(&ports.wallets),
            purchases,
            converter: Arc::clone(&converter),
            default_currency,
        }))
        .merge(api::discount::router(api::discount::DiscountState {
            discounts: Arc::clone(&ports.discounts),
        }))
        .merge(api::orders::router(api::orders::OrdersState {
            orders: Arc::clone(&ports.orders),
        }))
        .merge(api::entitlement::router(api::entitlement::EntitlementState {
            entitlement,
        }))
        .merge(api::stream::router(api::stream::StreamState { streaming }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                                                              ║");
    println!("║          🎬 REELPASS BACKEND SERVER IS RUNNING 🎬           ║");
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!(
        "║  🌐 Server Address:  http://{}                    ║",
        addr
    );
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:                                     ║");
    println!("║                                                              ║");
    println!("║  GET  /                     - Root endpoint                 ║");
    println!("║  GET  /health               - Health check                  ║");
    println!("║  GET  /health/ready         - Readiness probe               ║");
    println!("║  GET  /health/live          - Liveness probe                ║");
    println!("║  POST /api/purchase/wallet  - Wallet checkout               ║");
    println!("║  POST /api/purchase/card    - Verified card checkout        ║");
    println!("║  GET  /api/wallet/balance   - Wallet balances               ║");
    println!("║  POST /api/wallet/topup     - Verified wallet top-up        ║");
    println!("║  POST /api/discount/verify  - Redeem a discount code        ║");
    println!("║  GET  /api/orders           - Order history                 ║");
    println!("║  GET  /api/entitlement      - Access check (read-only)      ║");
    println!("║  POST /api/stream/url       - Signed stream URL             ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(
        address = %addr,
        "🚀 Server listening on http://{}",
        addr
    );
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = reconciler_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await {
            error!(error = %e, "Timed out waiting for reconciliation worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> &'static str {
    info!("📍 Root endpoint accessed");
    "Welcome to ReelPass Backend API"
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    info!("🏥 Health check requested");
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is down
    if !health_status.is_serving() {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        info!("✅ Health check passed");
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    info!("🔍 Readiness probe requested");
    // Readiness checks all dependencies
    let result = health(axum::extract::State(state)).await;
    if result.is_ok() {
        info!("✅ Readiness check passed");
    } else {
        error!("❌ Readiness check failed");
    }
    result
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> Result<&'static str, (axum::http::StatusCode, String)> {
    info!("💓 Liveness probe requested");
    // Liveness just checks if the service is running
    info!("✅ Liveness check passed");
    Ok("OK")
}
