use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use conveyor_queue::Queue;

/// Uploads are capped at 10 MB, matching the multipart parse limit of the
/// portal's predecessors.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed as `Arc<AppState>` to all handlers.
pub struct AppState {
    pub queue: Arc<Queue>,
}

impl AppState {
    pub fn new(queue: Arc<Queue>) -> Self {
        Self { queue }
    }
}

/// Assemble the portal router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/",
            get(crate::http::index::index_handler).post(crate::http::upload::upload_handler),
        )
        .route("/favicon.png", get(crate::http::assets::favicon_handler))
        .route("/health", get(crate::http::health::health_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
