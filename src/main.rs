use clap::Parser;
use r2d2::Pool;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use nl_analytics::classify::providers::build_classifier;
use nl_analytics::config::{AppConfig, CliArgs};
use nl_analytics::db::bootstrap::ensure_sales_table;
use nl_analytics::db::db_pool::{DuckDBConnectionManager, IN_MEMORY};
use nl_analytics::db::executor::DuckDbEngine;
use nl_analytics::db::schema_manager::SchemaManager;
use nl_analytics::llm::build_provider;
use nl_analytics::pipeline::QueryPipeline;
use nl_analytics::util::logging::init_tracing;
use nl_analytics::web;
use nl_analytics::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_format);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Ensure the database directory exists
    let connection_string = config.database.connection_string.clone();
    if connection_string != IN_MEMORY && !config.database.read_only {
        if let Some(parent) = Path::new(&connection_string).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!("Creating data directory: {}", parent.display());
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    info!(
        "Initializing DuckDB connection pool for {} (read_only = {})",
        connection_string, config.database.read_only
    );
    let db_manager = DuckDBConnectionManager::new(connection_string, config.database.read_only)?;
    let pool = Pool::builder()
        .max_size(config.database.max_pool_size()?)
        .build(db_manager)?;

    if config.database.bootstrap {
        let conn = pool.get()?;
        let seeded = ensure_sales_table(&conn, config.database.seed_csv.as_deref())?;
        info!("Sales table ready ({} rows seeded)", seeded);
    }

    // Initialize schema cache
    info!("Initializing schema cache");
    let schema_manager = Arc::new(SchemaManager::new(pool.clone()));
    if let Err(e) = schema_manager.refresh_cache().await {
        warn!("Failed to initialize schema cache: {}", e);
    }

    info!("Initializing LLM provider with backend: {}", config.llm.backend);
    let provider = build_provider(&config.llm)?;

    info!("Initializing classifier with backend: {}", config.classifier.backend);
    let classifier = build_classifier(&config.classifier)?;

    let pipeline = QueryPipeline::new(
        &config,
        provider,
        classifier,
        Arc::new(DuckDbEngine::new(pool)),
        schema_manager,
    );
    let app_state = Arc::new(AppState::new(config.clone(), pipeline));

    // Start the web server
    info!(
        "Starting nl-analytics server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(()) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
