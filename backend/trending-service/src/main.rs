use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use trending_service::metrics::serve_metrics;
use trending_service::{
    spawn_refresh_loops, Config, LinkTrends, RedisTrendStore, RefreshJob, StatusTrends, TagTrends,
    TrendStore, TrendsMetrics,
};

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json().with_current_span(false))
        .init();

    let config = Config::from_env().context("Failed to load config")?;

    info!(
        service = %config.service.service_name,
        env = %config.service.env,
        http_port = config.service.http_port,
        refresh_interval_secs = config.scheduler.refresh_interval_secs,
        "Starting trending service"
    );

    TrendsMetrics::register(prometheus::default_registry())
        .context("Failed to register trend metrics")?;

    let store: Arc<dyn TrendStore> = Arc::new(
        RedisTrendStore::connect(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?,
    );

    let jobs: Vec<Arc<dyn RefreshJob>> = vec![
        Arc::new(StatusTrends::with_options(store.clone(), config.statuses.clone())?),
        Arc::new(TagTrends::with_options(store.clone(), config.tags.clone())?),
        Arc::new(LinkTrends::with_options(store.clone(), config.links.clone())?),
    ];

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = spawn_refresh_loops(jobs, &config.scheduler, &shutdown_tx);

    // Runs until SIGINT/SIGTERM
    HttpServer::new(|| {
        App::new()
            .wrap(middleware::Logger::default())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(serve_metrics))
    })
    .bind(("0.0.0.0", config.service.http_port))
    .context("Failed to bind HTTP server")?
    .run()
    .await
    .context("HTTP server failed")?;

    info!("Shutdown signal received, stopping refresh loops");
    let _ = shutdown_tx.send(());

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Refresh task panicked");
        }
    }

    info!("Trending service stopped");
    Ok(())
}
