mod config;
mod engine;
mod evaluator;
mod executor;
mod health;
mod languages;
mod runner;
mod worker;

use anyhow::Context;
use config::{LanguageConfigManager, WorkerConfig};
use elite_common::broker::Broker;
use elite_common::redis::RedisBroker;
use executor::Executor;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use worker::{Worker, WorkerStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Elite Worker booting...");

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // Load language toolchains
    let languages = LanguageConfigManager::load_or_builtin(&config.languages_config).map_err(|e| {
        error!("Failed to load language configurations: {:#}", e);
        e
    })?;
    info!(
        source = %languages.source(),
        languages = ?languages.list_languages(),
        "Loaded language toolchains"
    );

    let executor = Arc::new(Executor::new(&languages));
    let status = Arc::new(WorkerStatus::new(config.concurrency));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // One connection per worker: a blocking pop must not stall another
    // worker's publish on a shared multiplexed connection
    let mut workers = JoinSet::new();
    for id in 0..config.concurrency {
        let broker: Arc<dyn Broker> = Arc::new(
            RedisBroker::connect(&config.broker.redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.broker.redis_url))?,
        );
        let worker = Worker {
            id,
            broker,
            executor: Arc::clone(&executor),
            status: Arc::clone(&status),
            cache_ttl: config.broker.result_cache_ttl,
        };
        let rx = shutdown_rx.clone();
        workers.spawn(async move { worker.run(rx).await });
    }
    info!(concurrency = config.concurrency, "Workers started");

    let health_listener = TcpListener::bind(config.health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", config.health_addr))?;
    info!("Health server listening on {}", config.health_addr);
    let health_app = health::router(Arc::clone(&status));
    let mut health_rx = shutdown_rx.clone();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            let _ = health_rx.changed().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server error");
        }
    });

    // Run until Ctrl-C or until a worker loses its broker for good
    let mut failed = false;
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            warn!("Received shutdown signal, finishing in-flight jobs...");
        }
        Some(joined) = workers.join_next() => {
            failed = true;
            match joined {
                Ok(Err(e)) => error!(error = %e, "Worker hit an unrecoverable broker failure"),
                Ok(Ok(())) => error!("Worker exited unexpectedly"),
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(joined) = workers.join_next().await {
        if let Ok(Err(e)) = joined {
            failed = true;
            error!(error = %e, "Worker stopped with broker failure");
        }
    }

    if failed {
        anyhow::bail!("Worker exited after an unrecoverable broker failure");
    }
    info!(jobs_processed = status.total_processed(), "Worker shutdown complete");
    Ok(())
}
