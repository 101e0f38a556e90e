use std::sync::Arc;

use adwarden_auth::{AccessContext, AuthError, CreateUserRequest, UpdateUserRequest, User};
use axum::Json;
use axum::extract::{Path, State};

use crate::state::AppState;

pub async fn list_users(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<User>>, AuthError> {
    Ok(Json(state.access_store.list_users().await?))
}

pub async fn get_user(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<User>, AuthError> {
    Ok(Json(state.access_store.get_user(&id).await?))
}

pub async fn create_user(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, AuthError> {
    Ok(Json(state.admin.create_user(&ctx, &req).await?))
}

pub async fn update_user(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<User>, AuthError> {
    Ok(Json(state.admin.update_user(&ctx, &id, &req).await?))
}
