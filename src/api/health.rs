use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `GET /`: liveness and version.
pub fn status_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Kiro API Gateway is running",
        "version": VERSION,
    }))
}

/// `GET /health`: liveness plus token and tenant-cache state.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": VERSION,
        "token_valid": state.global_token_valid().await,
        "tenant_sessions": state.tenant_session_count(),
        "auth_cache_max_size": state.config.auth_cache.max_size,
    }))
}
