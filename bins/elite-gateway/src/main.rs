mod config;
mod handlers;
mod metrics;
mod routes;
mod ws;

use anyhow::Context;
use axum::Router;
use config::GatewayConfig;
use elite_common::broker::{BrokerError, BrokerManager, BrokerSlot, GLOBAL_BROKER};
use elite_common::config::BrokerConfig;
use elite_common::redis::RedisBroker;
use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Establishes a fresh broker connection on demand
pub type Connector = Arc<dyn Fn() -> BoxFuture<'static, Result<BrokerManager, BrokerError>> + Send + Sync>;

pub struct AppState {
    slot: &'static BrokerSlot,
    connect: Connector,
}

impl AppState {
    pub fn new(slot: &'static BrokerSlot, connect: Connector) -> Self {
        Self { slot, connect }
    }

    /// The shared broker manager, connecting (or reconnecting) if needed
    pub async fn broker(&self) -> Result<Arc<BrokerManager>, BrokerError> {
        let connect = Arc::clone(&self.connect);
        self.slot.get_or_init(move || connect()).await
    }

    pub async fn broker_connected(&self) -> bool {
        match self.slot.get().await {
            Some(manager) => manager.is_open(),
            None => false,
        }
    }
}

fn redis_connector(config: BrokerConfig) -> Connector {
    Arc::new(move || {
        let redis_url = config.redis_url.clone();
        let timeout = config.round_trip_timeout;
        async move {
            let backend = RedisBroker::connect_with_subscriber(&redis_url).await?;
            info!("Connected to Redis: {}", redis_url);
            Ok::<_, BrokerError>(BrokerManager::new(Arc::new(backend), timeout))
        }
        .boxed()
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    warn!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Elite Gateway booting...");

    let config = GatewayConfig::from_env().context("Invalid gateway configuration")?;
    let state = Arc::new(AppState::new(&GLOBAL_BROKER, redis_connector(config.broker.clone())));

    // Connect early; if Redis is not up yet the first submission retries
    if let Err(e) = state.broker().await {
        warn!(error = %e, redis_url = %config.broker.redis_url, "Broker unavailable at startup");
    }

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.addr))?;

    info!("HTTP server listening on {}", config.addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    GLOBAL_BROKER.shutdown().await;
    info!("Gateway shutdown complete");
    Ok(())
}
