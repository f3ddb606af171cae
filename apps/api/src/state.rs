use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::render::service::RenderService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub render: RenderService,
    /// Verifies bearer tokens; see `auth::AuthUser`.
    pub verifier: Arc<dyn TokenVerifier>,
}
