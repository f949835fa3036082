//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the health check, the read-only mirror snapshot and the websocket
//! endpoint under a single Axum router. All mutations go through the
//! websocket so callers get correlated done/error frames.

pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::mirror::MirrorState;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/mirror", get(mirror_snapshot))
        .route("/api/ws", get(ws::handle_ws))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn mirror_snapshot(State(state): State<AppState>) -> Json<MirrorState> {
    Json(state.mirror.snapshot().await)
}
