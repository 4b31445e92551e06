use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::middleware::AuthContext;
use crate::api::response::{ApiError, JSend};
use crate::rbac::{propagator, Requirement};
use crate::AppState;

use super::{authorize, credential_error};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePermissionResponse {
    pub permission_id: u64,
}

#[derive(Debug, Deserialize)]
pub struct AssignPermissionsRequest {
    pub permission_ids: Vec<u64>,
    pub role_id: u64,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_permission(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CreatePermissionRequest>,
) -> Result<Json<JSend<CreatePermissionResponse>>, ApiError> {
    let requirement = Requirement::new().all(["PERMISSION:CREATE"]);
    authorize(&state, auth.user_id, &requirement)?;

    let permission = state
        .db
        .create_permission(&req.code, &req.name)
        .map_err(credential_error)?;

    Ok(JSend::success(CreatePermissionResponse {
        permission_id: permission.id,
    }))
}

/// Grant permissions to a role, then rewrite every holder's cached set
pub async fn assign_permissions(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<AssignPermissionsRequest>,
) -> Result<Json<JSend<serde_json::Value>>, ApiError> {
    let requirement = Requirement::new().all(["PERMISSION:UPDATE"]);
    authorize(&state, auth.user_id, &requirement)?;

    if req.permission_ids.is_empty() {
        return Err(ApiError::bad_request("permission_ids must not be empty"));
    }

    for permission_id in &req.permission_ids {
        state
            .db
            .assign_permission_to_role(req.role_id, *permission_id)
            .map_err(credential_error)?;
    }

    refresh_role_users(&state, req.role_id);

    Ok(JSend::success(serde_json::json!({})))
}

/// Revoke one permission from a role, then rewrite every holder's cached set
pub async fn remove_role_permission(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path((role_id, permission_id)): Path<(u64, u64)>,
) -> Result<Json<JSend<serde_json::Value>>, ApiError> {
    let requirement = Requirement::new().all(["PERMISSION:UPDATE"]);
    authorize(&state, auth.user_id, &requirement)?;

    state
        .db
        .remove_permission_from_role(role_id, permission_id)
        .map_err(credential_error)?;

    refresh_role_users(&state, role_id);

    Ok(JSend::success(serde_json::json!({})))
}

/// Propagate a role-permission mutation into every holder's cache entry.
/// The mutation has already committed; failures are logged and the stale
/// entries are corrected by the next refresh.
fn refresh_role_users(state: &AppState, role_id: u64) {
    if let Err(e) = propagator::refresh_users_by_role(&state.db, &state.config.tokens, role_id) {
        tracing::warn!(error = %e, role_id, "Failed to refresh role members' cached permissions");
    }
}
