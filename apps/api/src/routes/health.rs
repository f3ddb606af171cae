use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::state::AppState;

/// GET /health
/// Returns service status, version and render queue depth.
pub async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let queue = state.render.queue_depth().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "templar-render",
        "queue": queue
    })))
}
