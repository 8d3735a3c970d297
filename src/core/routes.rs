// Admin HTTP routes

use crate::core::state::TrackerState;
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Read-only operator API over the tracker's shared state.
pub fn build_router(state: TrackerState) -> Router {
    Router::new()
        .route("/health", get(crate::handlers::health::health_handler))
        .route("/metrics", get(crate::handlers::metrics::metrics_handler))
        .route("/resources", get(crate::handlers::resources::list_resources_handler))
        .route("/resources/{name}", get(crate::handlers::resources::resource_handler))
        .route("/peers/{id}", get(crate::handlers::resources::peer_handler))
        .route("/log", get(crate::handlers::resources::log_handler))

        // 404 fallback for all unmatched routes
        .fallback(crate::handlers::fallback::fallback_handler)

        .with_state(state)
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                    .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
            ),
        )
}
