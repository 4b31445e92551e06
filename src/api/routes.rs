use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::authenticate;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes -- no session required. Logout reads the bearer token
    // itself so a stale token still gets an idempotent success.
    let public_routes = Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/register", post(handlers::register));

    // Protected routes -- identity resolved once by the middleware,
    // permission requirements declared per handler
    let protected_routes = Router::new()
        .route("/auth/me", get(handlers::me))
        .route("/users", post(handlers::create_user))
        .route("/users/:user_id", get(handlers::get_user))
        .route("/users/:user_id/force-logout", post(handlers::force_logout))
        .route(
            "/users/:user_id/permissions",
            get(handlers::get_user_permissions),
        )
        .route("/users/:user_id/roles", get(handlers::get_user_roles))
        .route(
            "/users/:user_id/roles/:role_id",
            delete(handlers::remove_user_role),
        )
        .route("/roles", post(handlers::create_role))
        .route("/roles/assign", post(handlers::assign_roles))
        .route(
            "/roles/:role_id/permissions",
            get(handlers::get_role_permissions),
        )
        .route(
            "/roles/:role_id/permissions/:permission_id",
            delete(handlers::remove_role_permission),
        )
        .route("/permissions", post(handlers::create_permission))
        .route("/permissions/assign", post(handlers::assign_permissions))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authenticate,
        ));

    // Internal routes -- liveness probes
    let internal_routes = Router::new().route("/_internal/health", get(handlers::health));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(internal_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
