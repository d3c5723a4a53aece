//! HTTP surface: generation endpoint, artifact serving, health.

mod error;
mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::{application::generation::GenerationService, infra::storage::ArtifactStorage};

pub use error::{ApiError, codes};

#[derive(Clone)]
pub struct AppState {
    pub generation: GenerationService,
    pub storage: Arc<ArtifactStorage>,
}

pub fn build_router(state: AppState) -> Router {
    let artifacts = format!("{}/{{*path}}", state.storage.public_prefix());

    Router::new()
        .route("/generate", post(handlers::generate))
        .route(&artifacts, get(handlers::serve_artifact))
        .route("/_health", get(handlers::health))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::trace_requests))
}
