mod config;
mod db;
mod frame;
mod llm;
mod model;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::LlmChat;
use crate::store::DocumentStore;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PgStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env();
    let port = config.port;

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(database_url) => {
            let pool = db::init_pool(database_url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgStore::connect(pool).await.expect("document store init failed"))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory document store");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize LLM client (non-fatal: assistant falls back to rules if config missing).
    let llm: Option<Arc<dyn LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured; assistant uses fallback recommendations");
            None
        }
    };

    let state = state::AppState::new(store.clone(), llm, config);
    state.mirror.init_sync(store).await;

    let app = routes::app(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "parkwise listening");
    axum::serve(listener, app).await.expect("server failed");

    state.mirror.shutdown().await;
}
