pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::render::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Render API
        .route("/api/v1/render", post(handlers::handle_submit))
        .route(
            "/api/v1/render/:job_id/status",
            get(handlers::handle_status),
        )
        .route(
            "/api/v1/render/files/:file_name",
            get(handlers::handle_file),
        )
        .with_state(state)
}
