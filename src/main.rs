//! pganalytics HTTP server
//!
//! Starts the collector loop and an Axum web server that exposes the
//! snapshot store as a Prometheus scrape endpoint.

use axum::{Router, middleware as axum_middleware, routing::get};
use clap::Parser;
use pganalytics::{
    cli::{Cli, Command, generate_config_template},
    collector::Collector,
    config::Config,
    handlers::{self, AppState},
    middleware::request_id_middleware,
    registry::TenantRegistry,
    snapshot::SnapshotStore,
    source::PgDataSource,
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                println!("Wrote configuration template to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    // Load configuration
    let config = Arc::new(Config::from_file(&cli.config)?);

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        "Starting pganalytics on {}:{} with {} configured tenant(s)",
        config.server.host,
        config.server.port,
        config.tenants.len()
    );

    // Shared state
    let store = Arc::new(SnapshotStore::new());
    let registry = Arc::new(TenantRegistry::from_config(&config));
    let source: Arc<dyn pganalytics::source::DataSource> = Arc::new(PgDataSource::new(
        Duration::from_secs(config.collector.query_timeout_seconds),
    ));

    // Background loops stop through this channel on shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let collector = Collector::new(
        config.collector.clone(),
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&source),
    );
    let collector_handle = tokio::spawn(collector.run(shutdown_rx.clone()));

    let discovery_handle = if config.discovery.enabled {
        // Validated: control_tenant names an existing tenant
        let control = config
            .discovery
            .control_tenant
            .as_deref()
            .and_then(|id| config.tenant(id))
            .cloned()
            .ok_or("discovery.control_tenant missing after validation")?;

        Some(tokio::spawn(Arc::clone(&registry).run_discovery(
            source,
            control,
            Duration::from_secs(config.discovery.interval_seconds),
            Arc::clone(&store),
            shutdown_rx.clone(),
        )))
    } else {
        None
    };

    // Build router
    let state = AppState::new(Arc::clone(&config), store, registry);
    let app = Router::new()
        .route("/metrics", get(handlers::metrics::handler))
        .route("/health", get(handlers::health::handler))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Create socket address
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .unwrap_or_else(|_| std::net::IpAddr::from([0, 0, 0, 0])),
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    tracing::info!("Scrape endpoint available at http://{}/metrics", addr);

    // Start server; ctrl-c drains in-flight requests before returning
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the background loops; the collector finishes its in-flight
    // tenant before exiting.
    tracing::info!("Shutting down background loops");
    let _ = shutdown_tx.send(true);
    collector_handle.await?;
    if let Some(handle) = discovery_handle {
        handle.await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
