mod config;
mod core;
mod db;
mod errors;
mod models;

use crate::core::notify::NoopTransport;
use crate::core::{scheduler, service::LaundryService};
use crate::errors::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file (as early as possible)
    dotenv().ok(); // Make it non-fatal, env vars can be set externally
    info!("Attempted to load .env file.");

    // 3. Load the main application configuration
    let app_config = config::load_app_configuration()?;

    // 4. Initialize database (database_path comes from app_config)
    let db_pool = db::init_db(&app_config.database_path)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Provision the default fleet on an empty machines table
    db::seed_default_machines(&db_pool, &app_config)
        .await
        .inspect_err(|e| error!("Failed to seed default machines: {}", e))?;

    // 6. Build the service and run the countdown scheduler until shutdown.
    // The WhatsApp gateway transport plugs in here once credentials exist;
    // until then intents are produced and dropped.
    let arc_app_config = Arc::new(app_config);
    let service = Arc::new(LaundryService::new(
        db_pool,
        Arc::clone(&arc_app_config),
        Arc::new(NoopTransport),
    ));

    let scheduler_handle = tokio::spawn(scheduler::run(Arc::clone(&service)));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping scheduler.");
    scheduler_handle.abort();

    Ok(())
}
