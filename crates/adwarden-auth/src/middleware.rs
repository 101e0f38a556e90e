//! axum integration: the route guard layer and the [`AccessContext`] extractor.
//!
//! ```ignore
//! Router::new()
//!     .route("/api/cards", get(list_cards))
//!     .route_layer(guard.registry_guard());
//!
//! Router::new()
//!     .route("/api/reports/export", get(export))
//!     .route_layer(guard.require_permission("reports", Action::Export)?);
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{FromRequestParts, MatchedPath};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, header};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::authorize::{AccessContext, Authorizer};
use crate::error::AuthError;
use crate::jwt::{bearer_token, verify_jwt};
use crate::permissions::{Action, Requirement};
use crate::types::Identity;

/// Shared state behind every guard layer.
#[derive(Clone)]
pub struct AccessGuard {
    authorizer: Arc<Authorizer>,
    jwt_secret: Arc<str>,
}

impl AccessGuard {
    pub fn new(authorizer: Arc<Authorizer>, jwt_secret: &str) -> Self {
        Self {
            authorizer,
            jwt_secret: Arc::from(jwt_secret),
        }
    }

    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    /// Verified identity from the bearer token; `None` if absent or invalid.
    pub fn identify(&self, headers: &HeaderMap) -> Option<Identity> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let token = bearer_token(value)?;
        verify_jwt(token, &self.jwt_secret).ok()
    }

    /// Guard every route under the layer with one fixed requirement.
    pub fn require_permission(
        &self,
        module: &str,
        action: Action,
    ) -> Result<AccessLayer, AuthError> {
        Ok(AccessLayer {
            guard: self.clone(),
            source: Arc::new(RequirementSource::Fixed(Requirement::new(module, action)?)),
        })
    }

    /// Guard routes with the requirement the module registry binds to the
    /// matched route. Must be installed with `route_layer`.
    pub fn registry_guard(&self) -> AccessLayer {
        AccessLayer {
            guard: self.clone(),
            source: Arc::new(RequirementSource::Registry),
        }
    }

    fn requirement<B>(
        &self,
        source: &RequirementSource,
        req: &Request<B>,
    ) -> Result<Requirement, AuthError> {
        match source {
            RequirementSource::Fixed(r) => Ok(r.clone()),
            RequirementSource::Registry => {
                let Some(path) = req.extensions().get::<MatchedPath>() else {
                    return Err(AuthError::Configuration(format!(
                        "no matched route for {} {}",
                        req.method(),
                        req.uri().path()
                    )));
                };
                self.authorizer
                    .resolver()
                    .registry()
                    .requirement_for(req.method(), path.as_str())
                    .cloned()
                    .ok_or_else(|| {
                        AuthError::Configuration(format!(
                            "route {} {} is not registered to any module",
                            req.method(),
                            path.as_str()
                        ))
                    })
            }
        }
    }
}

#[derive(Debug)]
enum RequirementSource {
    Fixed(Requirement),
    Registry,
}

#[derive(Clone)]
pub struct AccessLayer {
    guard: AccessGuard,
    source: Arc<RequirementSource>,
}

impl<S> Layer<S> for AccessLayer {
    type Service = AccessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessService {
            inner,
            guard: self.guard.clone(),
            source: self.source.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessService<S> {
    inner: S,
    guard: AccessGuard,
    source: Arc<RequirementSource>,
}

impl<S> Service<Request<Body>> for AccessService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        // The clone is not ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let identity = self.guard.identify(req.headers());
        let requirement = self.guard.requirement(&self.source, &req);
        let authorizer = self.guard.authorizer.clone();

        Box::pin(async move {
            // Identity first: an anonymous caller gets 401 even on an unregistered route.
            let outcome = match (identity, requirement) {
                (None, _) => Err(AuthError::Unauthenticated),
                (Some(_), Err(e)) => Err(e),
                (Some(id), Ok(r)) => authorizer.authorize(Some(&id), &r).await,
            };
            match outcome {
                Ok(ctx) => {
                    req.extensions_mut().insert(ctx);
                    inner.call(req).await
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

impl<S> FromRequestParts<S> for AccessContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AccessContext>().cloned().ok_or_else(|| {
            AuthError::Configuration(format!(
                "handler for {} is not behind an access guard",
                parts.uri.path()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessConfig;
    use crate::jwt::AccessClaims;
    use crate::registry::ModuleRegistry;
    use crate::resolver::PermissionResolver;
    use crate::store::{AccessStore, SqliteAccessStore};
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use http_body_util::BodyExt;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    async fn guard() -> (Arc<SqliteAccessStore>, AccessGuard) {
        let store = Arc::new(SqliteAccessStore::open_in_memory().unwrap());
        store.migrate().await.unwrap();
        let registry = Arc::new(ModuleRegistry::builtin().unwrap());
        store.seed_defaults(&registry).await.unwrap();
        let resolver = Arc::new(PermissionResolver::new(
            store.clone(),
            registry,
            &AccessConfig::default(),
        ));
        let authz = Arc::new(Authorizer::new(store.clone(), resolver));
        (store, AccessGuard::new(authz, SECRET))
    }

    async fn token_for(store: &SqliteAccessStore, name: &str, role: &str) -> String {
        let role = store.get_role_by_name(role).await.unwrap();
        let user = store.create_user(name, None, &role.id).await.unwrap();
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = AccessClaims {
            sub: user.id,
            role_id: role.id,
            exp: now + 600,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn whoami(ctx: AccessContext) -> String {
        format!("{} {}", ctx.principal().role_name, ctx.requirement())
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut b = Request::builder().uri(uri);
        if let Some(t) = token {
            b = b.header("Authorization", format!("Bearer {t}"));
        }
        b.body(Body::empty()).unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn registry_guard_uses_matched_route() {
        let (store, guard) = guard().await;
        let app = Router::new()
            .route("/api/reports/{id}", get(whoami))
            .route_layer(guard.registry_guard());
        let token = token_for(&store, "v", "Viewer").await;

        let resp = app.oneshot(get_req("/api/reports/42", Some(&token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "Viewer reports.read");
    }

    #[tokio::test]
    async fn missing_token_is_401_and_denial_is_403() {
        let (store, guard) = guard().await;
        let app = Router::new()
            .route("/api/cards", get(whoami))
            .route_layer(guard.registry_guard());

        let resp = app.clone().oneshot(get_req("/api/cards", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let token = token_for(&store, "v", "Viewer").await;
        let resp = app.oneshot(get_req("/api/cards", Some(&token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["module"], "cards");
        assert_eq!(body["action"], "read");
        assert_eq!(body["role"], "Viewer");
    }

    #[tokio::test]
    async fn unregistered_route_fails_closed() {
        let (store, guard) = guard().await;
        let app = Router::new()
            .route("/api/secret", get(whoami))
            .route_layer(guard.registry_guard());
        let token = token_for(&store, "root", "SuperAdmin").await;
        let resp = app.oneshot(get_req("/api/secret", Some(&token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn anonymous_request_to_unregistered_route_is_401() {
        let (_, guard) = guard().await;
        let app = Router::new()
            .route("/api/secret", get(whoami))
            .route_layer(guard.registry_guard());
        let resp = app.oneshot(get_req("/api/secret", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(body_string(resp).await.contains("please log in"));
    }

    #[tokio::test]
    async fn fixed_requirement_layer() {
        let (store, guard) = guard().await;
        let app = Router::new()
            .route("/custom", get(whoami))
            .route_layer(guard.require_permission("reports", Action::Export).unwrap());
        let editor = token_for(&store, "e", "Editor").await;
        let viewer = token_for(&store, "v", "Viewer").await;

        let resp = app.clone().oneshot(get_req("/custom", Some(&editor))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.oneshot(get_req("/custom", Some(&viewer))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unguarded_handler_fails_closed() {
        let app: Router = Router::new().route("/open", get(whoami));
        let resp = app.oneshot(get_req("/open", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
