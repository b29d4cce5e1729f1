//! API routes

pub mod auth;
pub mod health;
pub mod users;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public API routes (no auth required)
    let public_api_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password/:token", post(auth::reset_password));

    // Protected API routes (access gate required); role allow-lists are
    // enforced per handler
    let protected_api_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(users::me))
        .route("/auth/profile", put(users::update_profile))
        // Admin surface
        .route("/users", get(users::list_users))
        .route("/users/:user_id/role", put(users::update_role))
        .route("/users/:user_id/sessions", delete(users::revoke_sessions))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        // Auth payloads are small; anything bigger is not a legitimate request
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
