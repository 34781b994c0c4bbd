//! Route definitions for the API.

use axum::{middleware, routing::get, Json, Router};

use super::handlers;
use super::middleware::auth::admin_middleware;
use super::SharedState;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    // Build OpenAPI spec once at startup
    let openapi = super::openapi::build_openapi();

    Router::new()
        // Health endpoints (no auth required)
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route(
            "/api-docs/openapi.json",
            get(move || {
                let doc = openapi.clone();
                async move { Json(doc) }
            }),
        )
        .nest("/api/v1", api_v1_routes(state.clone()))
        .with_state(state)
}

/// API v1 routes. Everything here is operator-only.
fn api_v1_routes(state: SharedState) -> Router<SharedState> {
    let auth_service = state.auth.clone();

    Router::new()
        .nest(
            "/backups",
            handlers::backups::router().layer(middleware::from_fn_with_state(
                auth_service.clone(),
                admin_middleware,
            )),
        )
        .route(
            "/admin/metrics",
            get(handlers::health::metrics).layer(middleware::from_fn_with_state(
                auth_service,
                admin_middleware,
            )),
        )
}
