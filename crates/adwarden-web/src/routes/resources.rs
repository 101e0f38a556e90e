use std::sync::Arc;

use adwarden_auth::{AccessContext, AuthError, ResourceQuery};
use axum::Json;
use axum::extract::{Extension, Path, Query, State};

use crate::models::{ExportResponse, ListParams};
use crate::resources::{NewResource, Resource, ResourceKind, UpdateResource};
use crate::state::AppState;

const MAX_PAGE: u32 = 500;

pub async fn list(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Resource>>, AuthError> {
    let mut query = ResourceQuery::new(kind.as_str()).page(
        params.limit.unwrap_or(100).min(MAX_PAGE),
        params.offset.unwrap_or(0),
    );
    if let Some(status) = params.status {
        query = query.with_status(status);
    }
    let scoped = state.privacy.scope_query(&ctx, query);
    Ok(Json(state.resources.list(&scoped).await?))
}

pub async fn get(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<String>,
) -> Result<Json<Resource>, AuthError> {
    let row = state.resources.get(kind, &id).await?;
    state.privacy.assert_visible(&ctx, &row)?;
    Ok(Json(row))
}

pub async fn create(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Json(req): Json<NewResource>,
) -> Result<Json<Resource>, AuthError> {
    if req.name.trim().is_empty() {
        return Err(AuthError::InvalidInput("name required".into()));
    }
    let draft = state.privacy.stamp_ownership(&ctx, req);
    let row = state.resources.create(kind, &draft).await?;
    tracing::debug!(kind = %kind, id = %row.id, owner = ?row.owner_id, "resource created");
    Ok(Json(row))
}

pub async fn update(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<String>,
    Json(mut req): Json<UpdateResource>,
) -> Result<Json<Resource>, AuthError> {
    let current = state.resources.get(kind, &id).await?;
    state.privacy.assert_ownership(&ctx, &current)?;
    if req.owner_id.is_some() && !state.privacy.is_privileged(&ctx) {
        tracing::debug!(user_id = %ctx.user_id(), "owner reassignment ignored");
        req.owner_id = None;
    }
    let row = state
        .resources
        .update(kind, &id, current.owner_id.as_deref(), &req)
        .await?;
    Ok(Json(row))
}

pub async fn delete(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let current = state.resources.get(kind, &id).await?;
    state.privacy.assert_ownership(&ctx, &current)?;
    state
        .resources
        .delete(kind, &id, current.owner_id.as_deref())
        .await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub async fn export(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<ResourceKind>,
) -> Result<Json<ExportResponse>, AuthError> {
    let scoped = state
        .privacy
        .scope_query(&ctx, ResourceQuery::new(kind.as_str()));
    let rows = state.resources.list(&scoped).await?;
    tracing::info!(user_id = %ctx.user_id(), kind = %kind, rows = rows.len(), "export");
    Ok(Json(ExportResponse {
        kind,
        exported_at: chrono::Utc::now().to_rfc3339(),
        count: rows.len(),
        rows,
    }))
}
