pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /sessions                      list sessions (GET)
/// /sessions/upload               upload a frame batch (POST, multipart)
/// /sessions/{id}                 session status (GET)
/// /sessions/{id}/process         start a pipeline run (POST)
/// /sessions/{id}/video           download the finished video (GET)
/// /sessions/{id}                 delete session and its data (DELETE)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(handlers::sessions::list))
        .route("/sessions/upload", post(handlers::sessions::upload))
        .route(
            "/sessions/{id}",
            get(handlers::sessions::status).delete(handlers::sessions::remove),
        )
        .route("/sessions/{id}/process", post(handlers::sessions::process))
        .route("/sessions/{id}/video", get(handlers::sessions::download))
}
