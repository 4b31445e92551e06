use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::api::middleware::{bearer_token, AuthContext};
use crate::api::response::{ApiError, JSend};
use crate::auth::service;
use crate::rbac::Requirement;
use crate::AppState;

use super::{auth_error, authorize};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub password: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: u64,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub login_time_epoch_ms: i64,
    pub permissions: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    pub user_id: u64,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct ForceLogoutResponse {
    pub terminated: bool,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<JSend<LoginResponse>>, ApiError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }

    let token = service::login(&state.db, &state.config.tokens, &req.username, &req.password)
        .map_err(auth_error)?;

    Ok(JSend::success(LoginResponse { token }))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<JSend<RegisterResponse>>, ApiError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }

    let user_id = service::register(&state.db, &req.username, &req.password).map_err(auth_error)?;

    Ok(JSend::success(RegisterResponse { user_id }))
}

/// Invalidate the caller's session. Idempotent: a missing or already
/// invalidated token still returns success.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<JSend<serde_json::Value>>, ApiError> {
    let token = bearer_token(&headers).unwrap_or_default();
    service::logout_self(&state.db, token).map_err(auth_error)?;

    Ok(JSend::success(serde_json::json!({})))
}

/// The caller's cached identity: roles, permissions and login time
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<JSend<MeResponse>>, ApiError> {
    let record = state
        .db
        .get_session(&auth.token)
        .map_err(|e| {
            tracing::error!(error = %e, "Session lookup failed");
            ApiError::internal("Session store unavailable")
        })?
        .ok_or_else(|| ApiError::unauthorized("Session expired"))?;

    Ok(JSend::success(MeResponse {
        login_time_epoch_ms: record.login_time.timestamp_millis(),
        permissions: record.permissions,
        roles: record.roles,
        user_id: record.user_id,
        username: record.username,
    }))
}

/// Terminate another user's session (privileged)
pub async fn force_logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<u64>,
) -> Result<Json<JSend<ForceLogoutResponse>>, ApiError> {
    let requirement = Requirement::new().all(["USER:FORCE_LOGOUT"]);
    authorize(&state, auth.user_id, &requirement)?;

    let terminated = service::force_logout(&state.db, user_id).map_err(auth_error)?;

    Ok(JSend::success(ForceLogoutResponse { terminated }))
}
