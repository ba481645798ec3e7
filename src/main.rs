use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subscription_service::cache::{AppCache, RedisTotalCache, TotalCache};
use subscription_service::config::{CacheBackend, Config, JobBackend};
use subscription_service::db::PgStore;
use subscription_service::jobs::{InMemoryJobQueue, JobQueue, PgJobQueue, WorkerPool};
use subscription_service::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "subscription_service=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let queue: Arc<dyn JobQueue> = match config.jobs.backend {
        JobBackend::Postgres => {
            let broker = if config.broker_url() == config.database_url {
                pool.clone()
            } else {
                PgPoolOptions::new()
                    .max_connections(config.database_max_connections)
                    .connect(config.broker_url())
                    .await
                    .context("failed to connect to job broker")?
            };
            let queue = PgJobQueue::new(
                broker,
                config.jobs.max_retries,
                config.jobs.retry_backoff_seconds,
                config.jobs.lease_seconds,
            );
            tracing::info!(owner = queue.owner(), "Using Postgres job queue");
            Arc::new(queue)
        }
        JobBackend::Memory => Arc::new(InMemoryJobQueue::new(
            config.jobs.max_retries,
            config.jobs.retry_backoff_seconds,
        )),
    };

    let cache: Arc<dyn TotalCache> = match config.cache.backend {
        CacheBackend::Memory => {
            if config.jobs.backend == JobBackend::Postgres {
                tracing::warn!(
                    "In-process total cache with a shared job queue: jobs run by other processes will not invalidate it"
                );
            }
            Arc::new(AppCache::new(&config.cache))
        }
        CacheBackend::Redis => Arc::new(RedisTotalCache::new(&config.cache)?),
    };

    let state = AppState::new(Arc::new(PgStore::new(pool)), cache, queue.clone());

    let workers = WorkerPool::new(
        queue,
        state.clone(),
        config.jobs.worker_count,
        Duration::from_millis(config.jobs.poll_interval_ms),
    );
    tracing::info!(
        workers = workers.size(),
        backend = ?config.jobs.backend,
        "Job workers started"
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workers.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
