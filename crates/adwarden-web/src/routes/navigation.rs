use std::sync::Arc;

use adwarden_auth::{AccessContext, AuthError};
use axum::Json;
use axum::extract::State;

use crate::models::NavigationResponse;
use crate::state::AppState;

pub async fn navigation(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<NavigationResponse>, AuthError> {
    let principal = ctx.principal();
    let modules = state.resolver.allowed_modules(&principal.role_id).await?;
    let permissions = state
        .resolver
        .effective_permissions(&principal.role_id)
        .await?
        .into_iter()
        .map(|r| r.to_string())
        .collect();
    Ok(Json(NavigationResponse {
        user_id: principal.user_id.clone(),
        role: principal.role_name.clone(),
        modules,
        permissions,
    }))
}
