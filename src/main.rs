// =============================================================================
// DEVICE DIRECTORY SERVICE - Main Entry Point
// =============================================================================
// - Manages installation devices (list/search, create, get, update)
// - Soft-deletes devices through the `is_active` flag
// - Exposes Prometheus metrics for observability
// =============================================================================

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use device_directory::auth::AuthSettings;
use device_directory::config::Config;
use device_directory::db::Database;
use device_directory::metrics::setup_metrics;
use device_directory::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Load environment variables
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok();

    // -------------------------------------------------------------------------
    // STEP 2: Initialize logging/tracing
    // -------------------------------------------------------------------------
    // RUST_LOG controls log levels, e.g. RUST_LOG=info,device_directory=debug
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,device_directory=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Device Directory Service...");

    // -------------------------------------------------------------------------
    // STEP 3: Load configuration
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        port = config.port,
        permission = %config.directory_permission,
        "Configuration loaded"
    );

    // -------------------------------------------------------------------------
    // STEP 4: Set up Prometheus metrics
    // -------------------------------------------------------------------------
    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 5: Connect to PostgreSQL database
    // -------------------------------------------------------------------------
    let db = Database::connect(&config.database_url, config.database_max_connections).await?;
    info!("Connected to PostgreSQL");

    db.run_migrations().await?;
    info!("Database migrations completed");

    // -------------------------------------------------------------------------
    // STEP 6: Build application state and routes
    // -------------------------------------------------------------------------
    let state = Arc::new(AppState {
        db,
        metrics_handle,
        auth: AuthSettings {
            jwt_secret: config.jwt_secret.clone(),
            permission: config.directory_permission.clone(),
        },
    });

    let app = build_router(state);

    // -------------------------------------------------------------------------
    // STEP 7: Start the HTTP server
    // -------------------------------------------------------------------------
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Device Directory Service is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
