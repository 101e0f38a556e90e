use std::sync::Arc;

use adwarden_auth::{
    AccessContext, AuthError, CreateRoleRequest, Permission, Role, RolePermissionRequest,
    UpdateRoleRequest,
};
use axum::Json;
use axum::extract::{Path, State};

use crate::models::{GrantResponse, ModuleResponse, RevokeResponse, RoleDetailResponse};
use crate::state::AppState;

pub async fn list_roles(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Role>>, AuthError> {
    Ok(Json(state.access_store.list_roles().await?))
}

pub async fn get_role(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RoleDetailResponse>, AuthError> {
    let role = state.access_store.get_role(&id).await?;
    let permissions = state.access_store.list_role_permissions(&id).await?;
    Ok(Json(RoleDetailResponse { role, permissions }))
}

pub async fn create_role(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateRoleRequest>,
) -> Result<Json<Role>, AuthError> {
    Ok(Json(state.admin.create_role(&ctx, &req).await?))
}

pub async fn update_role(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<Role>, AuthError> {
    Ok(Json(state.admin.update_role(&ctx, &id, &req).await?))
}

pub async fn delete_role(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AuthError> {
    state.admin.delete_role(&ctx, &id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub async fn list_role_permissions(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Permission>>, AuthError> {
    state.access_store.get_role(&id).await?;
    Ok(Json(state.access_store.list_role_permissions(&id).await?))
}

pub async fn grant_permission(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RolePermissionRequest>,
) -> Result<Json<GrantResponse>, AuthError> {
    let outcome = state.admin.grant(&ctx, &id, &req.permission_id).await?;
    Ok(Json(GrantResponse { outcome }))
}

pub async fn revoke_permission(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path((id, permission_id)): Path<(String, String)>,
) -> Result<Json<RevokeResponse>, AuthError> {
    let removed = state.admin.revoke(&ctx, &id, &permission_id).await?;
    Ok(Json(RevokeResponse { removed }))
}

/// Modules with an enforceable surface, for the grant editor.
pub async fn list_modules(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ModuleResponse>>, AuthError> {
    let modules = state.resolver.enforceable_modules().await?;
    Ok(Json(
        modules
            .into_iter()
            .map(|m| ModuleResponse {
                name: m.name,
                label: m.label,
                order: m.order,
                actions: m.actions.iter().map(|a| a.to_string()).collect(),
            })
            .collect(),
    ))
}
