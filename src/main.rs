use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use checkout_reconciler::api::{self, health::HealthChecker, AppState};
use checkout_reconciler::config::AppConfig;
use checkout_reconciler::ledger::{InMemoryRedemptionStore, RedemptionLedger, RedemptionStore};
use checkout_reconciler::logging::init_tracing;
use checkout_reconciler::payments::client::HttpPaymentGateway;
use checkout_reconciler::payments::gateway::PaymentGateway;
use checkout_reconciler::reconciler::{AdvisoryChannel, InMemoryChannel, Reconciler};
use checkout_reconciler::workers::PaymentPoller;

const EVICTION_PERIOD: Duration = Duration::from_secs(60);

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

/// Also releases every in-flight settlement wait so connections can drain.
async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging).context("failed to initialize tracing")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        order_service = %config.gateway.base_url,
        poll_interval = ?config.poller.interval,
        poll_max_duration = ?config.poller.max_duration,
        "🚀 Starting checkout reconciler"
    );

    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        HttpPaymentGateway::new(config.gateway.clone()).context("failed to build order service client")?,
    );

    let mut health = HealthChecker::default();

    // Advisory channel: Redis when configured, process-local otherwise
    let channel: Arc<dyn AdvisoryChannel> = match &config.cache.redis_url {
        #[cfg(feature = "cache")]
        Some(redis_url) => {
            use checkout_reconciler::cache::{init_cache_pool, RedisAdvisoryChannel, RedisPoolConfig};

            let pool = init_cache_pool(RedisPoolConfig {
                redis_url: redis_url.clone(),
                max_connections: config.cache.max_connections,
                ..RedisPoolConfig::default()
            })
            .await
            .context("failed to initialize Redis pool")?;
            health.redis_pool = Some(pool.clone());
            info!("✅ Advisory channel backed by Redis");
            Arc::new(RedisAdvisoryChannel::new(pool, config.cache.channel_ttl()))
        }
        _ => {
            info!("Advisory channel running in memory");
            Arc::new(InMemoryChannel::new())
        }
    };

    // Redemption ledger: Postgres when configured, in memory otherwise
    let store: Arc<dyn RedemptionStore> = match &config.database {
        #[cfg(feature = "database")]
        Some(database) => {
            use checkout_reconciler::database::{init_pool_from_config, PgRedemptionRepository};

            let pool = init_pool_from_config(database)
                .await
                .context("failed to initialize database pool")?;
            health.db_pool = Some(pool.clone());
            let repository = PgRedemptionRepository::new(pool);
            repository
                .ensure_schema()
                .await
                .context("failed to prepare redemption schema")?;
            info!("✅ Redemption ledger backed by Postgres");
            Arc::new(repository)
        }
        _ => {
            info!("Redemption ledger running in memory");
            Arc::new(InMemoryRedemptionStore::new())
        }
    };

    let ledger = Arc::new(RedemptionLedger::new(gateway.clone(), store));
    let poller = Arc::new(PaymentPoller::new(gateway.clone(), config.poller.clone()));
    let reconciler = Reconciler::new(gateway, channel.clone(), ledger, poller)
        .with_retention(config.order_retention);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(
        reconciler
            .clone()
            .run_eviction(EVICTION_PERIOD, shutdown_rx.clone()),
    );

    let app = api::router(AppState {
        reconciler,
        channel,
        handoff: config.handoff.clone(),
        shutdown: shutdown_rx,
        health,
    })
    .layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(address = %addr, "🌐 Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(shutdown_tx.clone()))
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    info!("👋 Server shutdown complete");
    Ok(())
}
