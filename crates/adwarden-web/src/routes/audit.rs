use std::sync::Arc;

use adwarden_auth::{AccessContext, AuditEntry, AuthError};
use axum::Json;
use axum::extract::{Query, State};

use crate::models::AuditParams;
use crate::state::AppState;

pub async fn list_audit(
    _ctx: AccessContext,
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditParams>,
) -> Result<Json<Vec<AuditEntry>>, AuthError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let offset = query.offset.unwrap_or(0);

    let entries = state.access_store.list_audit(limit, offset).await?;
    Ok(Json(entries))
}
