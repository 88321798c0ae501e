//! HTTP surface: one `axum::Router` per feature area, merged under
//! a shared `AppState`.

pub mod auth;
mod build;
mod preview;
mod react;
mod sessions;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;

pub use state::AppState;

/// Build the full router: feature sub-routers merged, then CORS and
/// response compression layered on top, then state attached.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
    .merge(react::routes())
    .merge(sessions::routes())
    .merge(preview::routes())
    .merge(build::routes())
    .layer(CompressionLayer::new())
    .layer(CorsLayer::permissive())
    .with_state(state)
}

/// How long a handler may hold the HTTP response open with no bytes
/// written before the keep-alive comment is sent.
pub const SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
