use axum::http::header;
use axum::response::IntoResponse;

static FAVICON: &[u8] = include_bytes!("../../static/favicon.png");

/// `GET /favicon.png` — embedded static asset.
pub async fn favicon_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], FAVICON)
}
