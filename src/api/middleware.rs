//! Bearer authentication middleware
//!
//! Resolves the caller's identity from the session cache exactly once per
//! request and passes it to handlers as an `AuthContext` extension; the
//! core never reads ambient "current user" state. Applies sliding expiry:
//! sessions close to expiring are renewed to the full TTL.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, Response, StatusCode},
    middleware::Next,
};
use std::sync::Arc;

use crate::auth::service;
use crate::AppState;

/// Identity resolved from the request's bearer token
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub token: String,
    pub user_id: u64,
}

/// Middleware guarding the protected routes. Requests without a live
/// session get a 401; permission checks are the handlers' concern.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let token = match bearer_token(request.headers()) {
        Some(token) => token.to_string(),
        None => return fail_response(StatusCode::UNAUTHORIZED, "Missing bearer token"),
    };

    let user_id = match service::identity_from_token(&state.db, &token) {
        Ok(Some(user_id)) => user_id,
        Ok(None) => return fail_response(StatusCode::UNAUTHORIZED, "Invalid or expired token"),
        Err(e) => {
            tracing::error!(error = %e, "Identity lookup failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Session store unavailable",
            );
        }
    };

    renew_if_needed(&state, &token);

    request
        .extensions_mut()
        .insert(AuthContext { token, user_id });
    next.run(request).await
}

/// Extract the token from an `Authorization: Bearer ...` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Sliding expiry: once the remaining TTL drops below the configured
/// threshold, the next authenticated request renews the session (both
/// index families share the record's expiry, so they move together).
fn renew_if_needed(state: &AppState, token: &str) {
    let threshold = chrono::Duration::seconds(state.config.tokens.renew_threshold_seconds as i64);

    match state.db.remaining_session_ttl(token) {
        Ok(Some(remaining)) if remaining < threshold => {
            let ttl = chrono::Duration::seconds(state.config.tokens.session_ttl_seconds as i64);
            match state.db.renew_session(token, ttl) {
                Ok(true) => tracing::debug!("Session renewed"),
                Ok(false) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to renew session"),
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to read remaining session TTL"),
    }
}

/// Build a JSend fail response without going through a handler
fn fail_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({
        "status": "fail",
        "data": { "message": message },
    });
    json_response(status, &body)
}

/// Build a JSend error response without going through a handler
fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({
        "status": "error",
        "message": message,
    });
    json_response(status, &body)
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap_or_default()))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Body::empty())
                .unwrap()
        })
}
