pub mod audit;
pub mod dashboard;
pub mod navigation;
pub mod permissions;
pub mod resources;
pub mod roles;
pub mod users;

use std::sync::Arc;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{delete, get, put};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::resources::ResourceKind;
use crate::state::AppState;

fn resource_routes(kind: ResourceKind) -> Router<Arc<AppState>> {
    let base = format!("/api/{kind}");
    let mut router = Router::new()
        .route(&base, get(resources::list).post(resources::create))
        .route(
            &format!("{base}/{{id}}"),
            get(resources::get)
                .put(resources::update)
                .delete(resources::delete),
        );
    if kind.exportable() {
        router = router.route(&format!("{base}/export"), get(resources::export));
    }
    router.layer(Extension(kind))
}

/// Every `/api` route sits behind the registry guard; a route the module
/// registry does not know is refused.
pub fn build_router(state: Arc<AppState>, body_limit: usize) -> Router {
    let mut api = Router::new()
        .route("/api/dashboard", get(dashboard::summary))
        .route("/api/navigation", get(navigation::navigation))
        .route(
            "/api/admin/users",
            get(users::list_users).post(users::create_user),
        )
        .route(
            "/api/admin/users/{id}",
            get(users::get_user).put(users::update_user),
        )
        .route(
            "/api/admin/roles",
            get(roles::list_roles).post(roles::create_role),
        )
        .route(
            "/api/admin/roles/{id}",
            get(roles::get_role)
                .put(roles::update_role)
                .delete(roles::delete_role),
        )
        .route(
            "/api/admin/roles/{id}/permissions",
            get(roles::list_role_permissions).post(roles::grant_permission),
        )
        .route(
            "/api/admin/roles/{id}/permissions/{permission_id}",
            delete(roles::revoke_permission),
        )
        .route("/api/admin/modules", get(roles::list_modules))
        .route(
            "/api/admin/permissions",
            get(permissions::list_permissions).post(permissions::create_permission),
        )
        .route(
            "/api/admin/permissions/{id}",
            put(permissions::set_permission_active),
        )
        .route("/api/admin/audit", get(audit::list_audit));

    for kind in ResourceKind::ALL {
        api = api.merge(resource_routes(kind));
    }

    let api = api
        .route_layer(state.guard.registry_guard())
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}
