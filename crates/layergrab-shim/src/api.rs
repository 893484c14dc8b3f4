//! Shim registry router.
//!
//! Implements the push-side surface of the Registry v1 wire protocol: just
//! enough for an unmodified daemon to complete one image push against this
//! process. Repository paths may carry a namespace (`ns/repo`), so the
//! `/v1/repositories` subtree is matched with a wildcard and dispatched by
//! [`crate::handlers`].

use crate::handlers;
use crate::layout::LayoutWriter;
use crate::session::SessionContext;
use axum::{
    routing::{get, put},
    Router,
};
use std::sync::Arc;

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Identifier guard and per-identifier push sessions.
    pub session: Arc<SessionContext>,
    /// On-disk layout selected at startup.
    pub layout: Arc<dyn LayoutWriter>,
    /// `host:port` the shim is reachable on, advertised back to the daemon.
    pub endpoint: String,
}

/// Creates the shim registry router with all endpoints.
#[must_use]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Liveness probe
        .route("/v1/_ping", get(handlers::ping))
        // Image endpoints (one per artifact)
        .route("/v1/images/{id}/json", get(handlers::get_image_json))
        .route("/v1/images/{id}/json", put(handlers::put_image_json))
        .route("/v1/images/{id}/layer", put(handlers::put_image_layer))
        .route("/v1/images/{id}/checksum", put(handlers::put_image_checksum))
        // Repository endpoints (namespaced paths, dispatched by hand)
        .route("/v1/repositories/{*rest}", get(handlers::repository_get))
        .route("/v1/repositories/{*rest}", put(handlers::repository_put))
        .with_state(state)
}
