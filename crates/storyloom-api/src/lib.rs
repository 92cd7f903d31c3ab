//! Storyloom API — HTTP adapter over the generation engine.

pub mod capabilities;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use axum::Router;

/// Mounts every route under its prefix. Shared by the binary and tests.
pub fn app(state: state::AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/sessions", routes::conversation::router())
        .nest("/api/v1/projects", routes::projects::router())
        .nest("/api/v1/jobs", routes::jobs::router())
        .nest("/api/v1/artifacts", routes::artifacts::router())
        .nest("/api/v1/creation", routes::creation::router())
        .with_state(state)
}

#[cfg(test)]
mod testing;
