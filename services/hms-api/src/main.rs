//! Hospital management records API server.
//!
//! Serves the generic record endpoints for every entity in the catalog,
//! backed by Postgres or by in-process memory.

use std::sync::Arc;

use anyhow::Result;
use hms_api::{
    api,
    catalog::Catalog,
    config::{self, StoreKind},
    state::AppState,
    store::{memory::MemoryStore, postgres::PgStore, RecordStore},
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to HMS_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting hms-api");
    info!(listen_addr = %config.listen_addr, store = ?config.store, "Configuration loaded");

    let catalog = match Catalog::load(config.catalog_path.as_deref()) {
        Ok(catalog) => {
            info!(entities = catalog.entities().len(), "Entity catalog loaded");
            catalog
        }
        Err(e) => {
            error!(error = %e, "Failed to load entity catalog");
            return Err(e.into());
        }
    };

    let store: Arc<dyn RecordStore> = match config.store {
        StoreKind::Memory => {
            warn!("Using in-memory record store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Postgres => {
            let db = match PgStore::connect(&config.database).await {
                Ok(db) => {
                    info!("Database connection established");
                    db
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            if config.run_migrations {
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }

            Arc::new(db)
        }
    };

    // Create application state
    let state = AppState::new(catalog, store, config.allocation_retries);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("hms-api shutdown complete");
    Ok(())
}
