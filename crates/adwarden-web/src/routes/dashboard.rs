use std::sync::Arc;

use adwarden_auth::{AccessContext, AuthError, ResourceQuery};
use axum::Json;
use axum::extract::State;

use crate::models::DashboardResponse;
use crate::resources::ResourceKind;
use crate::state::AppState;

/// Per-kind counts over the caller's visible rows. Kinds the role may not
/// read are left out.
pub async fn summary(
    ctx: AccessContext,
    State(state): State<Arc<AppState>>,
) -> Result<Json<DashboardResponse>, AuthError> {
    let mut kinds = Vec::new();
    for kind in ResourceKind::ALL {
        if !state
            .resolver
            .has_permission(&ctx.principal().role_id, kind.as_str(), "read")
            .await?
        {
            continue;
        }
        let scoped = state
            .privacy
            .scope_query(&ctx, ResourceQuery::new(kind.as_str()));
        kinds.push(state.resources.summarize(&scoped).await?);
    }
    Ok(Json(DashboardResponse { kinds }))
}
