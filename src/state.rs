//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the document store, the collection mirror fed from it, the
//! optional LLM client and the parsed configuration.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::LlmChat;
use crate::services::mirror::ParkMirror;
use crate::store::DocumentStore;

// =============================================================================
// APP STATE
// =============================================================================

/// Clone is required by Axum; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub mirror: ParkMirror,
    /// Optional LLM client. `None` if LLM env vars are not configured.
    pub llm: Option<Arc<dyn LlmChat>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, llm: Option<Arc<dyn LlmChat>>, config: AppConfig) -> Self {
        let mirror = ParkMirror::new(config.mirror);
        Self { store, mirror, llm, config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
