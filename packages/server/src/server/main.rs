// Main entry point for the arbiter server

use std::sync::Arc;

use anyhow::{Context, Result};
use arbiter::Engine;
use arbiter_server::{kernel::SimulatedTransport, server::build_app, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,arbiter=debug,arbiter_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting robotic ball arbiter");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(model = ?config.engine.device_model, "Configuration loaded");

    // Start the arbitration loop against the simulated device
    let transport = Arc::new(SimulatedTransport::new());
    let engine = Engine::builder(transport.clone())
        .with_config(config.engine.clone())
        .build()
        .context("Failed to build arbitration engine")?;
    let (handle, engine_task) = engine.start();
    let drain = transport.spawn_battery_drain(handle.clone(), config.sim_drain_interval);

    // Build application
    let app = build_app(handle.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Event stream: http://localhost:{}/events", config.port);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    // Stop the loop and the simulation
    handle.shutdown();
    drain.abort();
    engine_task
        .await
        .context("Arbitration loop panicked")?
        .context("Arbitration loop failed")?;

    Ok(())
}
