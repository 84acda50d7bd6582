//! API routes

pub mod auth;
pub mod billing;
pub mod enrollments;
pub mod health;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health checks and the signed webhook are the only unauthenticated routes.
    let public_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/api/billing/webhook", post(billing::webhook));

    let protected_routes = Router::new()
        .route("/api/billing/checkout", post(billing::checkout))
        .route(
            "/api/billing/downgrade",
            post(billing::downgrade).delete(billing::resume),
        )
        .route("/api/billing/status", get(billing::status))
        .route("/api/enrollments", post(enrollments::enroll))
        .route("/api/enrollments/:course_id", get(enrollments::check))
        .route("/api/auth/session/refresh", post(auth::refresh_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
