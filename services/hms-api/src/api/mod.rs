//! HTTP API handlers and routing.

pub mod error;
mod health;
pub mod request_context;
mod resources;

use axum::{
    http::{header, HeaderName, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(request_context::REQUEST_ID_HEADER),
        ])
        .allow_origin(Any);

    // Health endpoints
    let mut router = Router::new().merge(health::routes());

    // One resource router per catalog entity
    for entity in state.catalog().entities() {
        router = router
            .nest(&entity.base_path, resources::routes(entity.clone()))
            .route(
                &format!("{}/", entity.base_path),
                resources::collection_route(entity.clone()),
            );
    }

    router
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Application state
        .with_state(state)
}
