//! Main entrypoint for the vocabulary tutor API service.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the database connection pool and running migrations.
//! 3. Wiring the generation client, retriever, and capability registry
//!    into the turn workflow.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use vocab_api::{config::Config, db::Db, router::api_router, state::AppState};
use vocab_core::{
    capabilities, GenerationClient, HttpRetriever, OpenAiGenerationClient, Retriever, TurnWorkflow,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize the Turn Workflow ---
    let openai_config = OpenAIConfig::new().with_api_key(&config.openai_api_key);
    let generation: Arc<dyn GenerationClient> = Arc::new(OpenAiGenerationClient::new(
        openai_config,
        config.chat_model.clone(),
        config.temperature,
        config.max_tokens,
    ));
    let retriever: Arc<dyn Retriever> = Arc::new(HttpRetriever::new(
        reqwest::Client::new(),
        config.retrieval_url.clone(),
        config.retrieval_collection.clone(),
        config.min_relevance,
    ));
    let registry = Arc::new(
        capabilities::builtin_registry(config.search_k)
            .context("Failed to build the capability registry")?,
    );
    let workflow = Arc::new(TurnWorkflow::new(registry, generation, retriever));

    let app_state = AppState::new(db, workflow, Arc::new(config.clone()));

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = api_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
