//! services/api/src/bin/api.rs

use progression_api::{
    adapters::db::DbAdapter,
    config::{Config, StoreBackend},
    error::ApiError,
    web::{router, state::AppState},
};
use progression_core::{
    AchievementCatalog, CollectionStore, InMemoryCollectionStore, ProgressionEngine, StoreOptions,
    SystemClock,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect the Backing Store ---
    let store: Arc<dyn CollectionStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; nothing will survive a restart.");
            Arc::new(InMemoryCollectionStore::new())
        }
    };

    // --- 3. Load the Achievement Catalog ---
    let catalog = if config.achievements_path.exists() {
        AchievementCatalog::load(&config.achievements_path)?
    } else {
        warn!(
            "No achievement catalog at {}; achievements are disabled.",
            config.achievements_path.display()
        );
        AchievementCatalog::default()
    };
    info!("Loaded {} achievement definitions.", catalog.len());

    // --- 4. Build the Engine & Shared AppState ---
    let options = StoreOptions {
        timeout: config.store_timeout,
        max_attempts: config.store_conflict_retries,
    };
    let engine = Arc::new(ProgressionEngine::new(
        store,
        catalog,
        options,
        Arc::new(SystemClock),
    ));
    let app_state = Arc::new(AppState { engine });

    // --- 5. Create the Web Router ---
    let app = router(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
