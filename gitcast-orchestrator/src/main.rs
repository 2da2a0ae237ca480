use anyhow::Context;
use gitcast_core::domain::stage::Stage;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod capability;
pub mod config;
pub mod db;
pub mod executor;
pub mod repository;
pub mod scheduler;
pub mod service;

use capability::{HttpStage, StageRegistry};
use config::Config;
use executor::PipelineExecutor;
use repository::{
    CacheRepository, InMemoryCacheRepository, InMemoryJobRepository, JobRepository,
    PgCacheRepository, PgJobRepository,
};
use scheduler::Scheduler;
use service::{Orchestrator, rate_limit::RateLimiter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gitcast_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gitcast Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let (jobs, cache) = open_stores(&config).await?;

    let client = reqwest::Client::new();
    let mut stages = StageRegistry::new();
    for stage in Stage::ALL {
        let endpoint = config.stage_url(stage);
        tracing::info!("Stage {} -> {}", stage, endpoint);
        stages.register(stage, Arc::new(HttpStage::new(client.clone(), endpoint)));
    }

    let executor = Arc::new(PipelineExecutor::new(
        stages,
        jobs.clone(),
        cache.clone(),
        config.execution_policy(),
    ));
    let scheduler = Arc::new(Scheduler::start(
        executor,
        config.worker_slots,
        config.queue_depth,
    ));

    scheduler
        .recover(jobs.as_ref())
        .await
        .context("Failed to recover jobs from a previous run")?;

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit_quota,
        config.rate_limit_window,
    ));
    let _maintenance = service::cache::spawn_maintenance(
        cache,
        config.freshness(),
        rate_limiter.clone(),
        config.cache_sweep_interval,
    );

    // Build router with all API endpoints
    let app = api::create_router(Orchestrator {
        jobs,
        scheduler,
        rate_limiter,
        estimated_job_seconds: config.estimated_job_seconds,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, in-memory maps otherwise
async fn open_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn JobRepository>, Arc<dyn CacheRepository>)> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, job records will not survive a restart");
        return Ok((
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryCacheRepository::new()),
        ));
    };

    tracing::info!("Connecting to database...");

    // Create database connection pool
    let pool = db::create_pool(database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Database connection pool created");

    // Run migrations
    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok((
        Arc::new(PgJobRepository::new(pool.clone())),
        Arc::new(PgCacheRepository::new(pool)),
    ))
}
