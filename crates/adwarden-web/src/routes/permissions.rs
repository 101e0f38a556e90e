use std::sync::Arc;

use adwarden_auth::{
    AccessContext, AuthError, CreatePermissionRequest, Permission, SetActiveRequest,
};
use axum::Json;
use axum::extract::{Path, State};

use crate::state::AppState;

pub async fn list_permissions(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Permission>>, AuthError> {
    Ok(Json(state.access_store.list_permissions().await?))
}

pub async fn create_permission(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePermissionRequest>,
) -> Result<Json<Permission>, AuthError> {
    Ok(Json(state.admin.create_permission(&ctx, &req).await?))
}

/// Enable or disable a permission. Every cached role is dropped.
pub async fn set_permission_active(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<Permission>, AuthError> {
    Ok(Json(
        state
            .admin
            .set_permission_active(&ctx, &id, req.is_active)
            .await?,
    ))
}
