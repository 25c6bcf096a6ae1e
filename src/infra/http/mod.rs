pub mod api;
mod middleware;

pub use api::{ApiState, build_api_router};

use axum::{Router, middleware as axum_middleware, routing::get};

/// The full HTTP surface: item API plus an unauthenticated health check.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(api::handlers::health))
        .merge(build_api_router(state))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
