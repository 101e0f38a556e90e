//! Request-scoped authorization.
//!
//! A request starts unchecked and ends either allowed, holding an
//! [`AccessContext`], or denied with an [`AuthError`]. `AccessContext` can
//! only be built here, and the data privacy filter takes one by reference,
//! so row filtering cannot run before authorization has succeeded.

use std::sync::Arc;

use crate::error::AuthError;
use crate::permissions::Requirement;
use crate::resolver::{Decision, PermissionResolver, with_deadline};
use crate::store::AccessStore;
use crate::types::{Identity, Principal};

/// Proof that a principal passed the module-level check for one requirement.
#[derive(Debug, Clone)]
pub struct AccessContext {
    principal: Principal,
    requirement: Requirement,
    decision: Decision,
}

impl AccessContext {
    pub(crate) fn new(principal: Principal, requirement: Requirement, decision: Decision) -> Self {
        Self {
            principal,
            requirement,
            decision,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn user_id(&self) -> &str {
        &self.principal.user_id
    }

    pub fn requirement(&self) -> &Requirement {
        &self.requirement
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }
}

pub struct Authorizer {
    store: Arc<dyn AccessStore>,
    resolver: Arc<PermissionResolver>,
}

impl Authorizer {
    pub fn new(store: Arc<dyn AccessStore>, resolver: Arc<PermissionResolver>) -> Self {
        Self { store, resolver }
    }

    pub fn resolver(&self) -> &Arc<PermissionResolver> {
        &self.resolver
    }

    /// Load the principal behind a verified identity, failing closed on any
    /// inactive user or role.
    pub async fn load_principal(&self, identity: &Identity) -> Result<Principal, AuthError> {
        let loaded = with_deadline(
            self.resolver.timeout(),
            "load principal",
            self.store.load_principal(&identity.user_id),
        )
        .await;
        let (user, role) = match loaded {
            Ok(pair) => pair,
            Err(AuthError::NotFound(_)) => {
                tracing::info!(user_id = %identity.user_id, "token names an unknown user");
                return Err(AuthError::Unauthenticated);
            }
            Err(e) => return Err(e),
        };

        if !user.is_active || !role.is_active {
            tracing::info!(
                user_id = %user.id,
                role = %role.name,
                user_active = user.is_active,
                role_active = role.is_active,
                "inactive principal rejected"
            );
            return Err(AuthError::InactiveAccount);
        }
        if identity.role_id != user.role_id {
            tracing::debug!(
                user_id = %user.id,
                token_role = %identity.role_id,
                current_role = %user.role_id,
                "role changed since token was issued; using current role"
            );
        }
        Ok(Principal::from_parts(&user, &role))
    }

    /// Gate one operation. Never touches business data.
    pub async fn authorize(
        &self,
        identity: Option<&Identity>,
        requirement: &Requirement,
    ) -> Result<AccessContext, AuthError> {
        let Some(identity) = identity else {
            return Err(AuthError::Unauthenticated);
        };
        let principal = self.load_principal(identity).await?;
        self.authorize_principal(principal, requirement).await
    }

    /// Gate one operation for an already loaded principal.
    pub async fn authorize_principal(
        &self,
        principal: Principal,
        requirement: &Requirement,
    ) -> Result<AccessContext, AuthError> {
        let decision = self.resolver.decide(&principal.role_id, requirement).await?;
        match decision {
            Decision::Bypassed => {
                tracing::info!(
                    user_id = %principal.user_id,
                    role = %principal.role_name,
                    module = %requirement.module,
                    action = %requirement.action,
                    "superadmin bypass"
                );
            }
            Decision::Open => {
                tracing::debug!(module = %requirement.module, "default-allow module");
            }
            Decision::Granted => {
                tracing::debug!(
                    user_id = %principal.user_id,
                    module = %requirement.module,
                    action = %requirement.action,
                    "access granted"
                );
            }
            Decision::Denied => {
                tracing::info!(
                    user_id = %principal.user_id,
                    role = %principal.role_name,
                    module = %requirement.module,
                    action = %requirement.action,
                    "access denied"
                );
                return Err(AuthError::permission_denied(
                    &requirement.module,
                    requirement.action.as_str(),
                    &principal.role_name,
                ));
            }
        }
        Ok(AccessContext::new(principal, requirement.clone(), decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessConfig;
    use crate::permissions::Action;
    use crate::registry::ModuleRegistry;
    use crate::store::SqliteAccessStore;
    use crate::types::UpdateUserRequest;

    async fn setup() -> (Arc<SqliteAccessStore>, Authorizer) {
        let store = Arc::new(SqliteAccessStore::open_in_memory().unwrap());
        store.migrate().await.unwrap();
        let registry = Arc::new(ModuleRegistry::builtin().unwrap());
        store.seed_defaults(&registry).await.unwrap();
        let resolver = Arc::new(PermissionResolver::new(
            store.clone(),
            registry,
            &AccessConfig::default(),
        ));
        (store.clone(), Authorizer::new(store, resolver))
    }

    async fn identity(store: &SqliteAccessStore, name: &str, role: &str) -> Identity {
        let role = store.get_role_by_name(role).await.unwrap();
        let user = store.create_user(name, None, &role.id).await.unwrap();
        Identity {
            user_id: user.id,
            role_id: role.id,
        }
    }

    fn reports_read() -> Requirement {
        Requirement::new("reports", Action::Read).unwrap()
    }

    #[tokio::test]
    async fn missing_identity_is_unauthenticated() {
        let (_, authz) = setup().await;
        let err = authz.authorize(None, &reports_read()).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn unknown_user_is_unauthenticated() {
        let (_, authz) = setup().await;
        let ghost = Identity {
            user_id: "ghost".into(),
            role_id: "r".into(),
        };
        let err = authz.authorize(Some(&ghost), &reports_read()).await.unwrap_err();
        assert!(matches!(err, AuthError::Unauthenticated));
    }

    #[tokio::test]
    async fn granted_request_carries_principal() {
        let (store, authz) = setup().await;
        let id = identity(&store, "u1", "Editor").await;
        let ctx = authz.authorize(Some(&id), &reports_read()).await.unwrap();
        assert_eq!(ctx.user_id(), id.user_id);
        assert_eq!(ctx.principal().role_name, "Editor");
        assert_eq!(ctx.principal().role_level, 3);
        assert_eq!(ctx.decision(), Decision::Granted);
    }

    #[tokio::test]
    async fn denial_names_module_action_and_role() {
        let (store, authz) = setup().await;
        let id = identity(&store, "u1", "Viewer").await;
        let req = Requirement::new("campaigns", Action::Delete).unwrap();
        match authz.authorize(Some(&id), &req).await.unwrap_err() {
            AuthError::PermissionDenied {
                module,
                action,
                role,
            } => {
                assert_eq!(module, "campaigns");
                assert_eq!(action, "delete");
                assert_eq!(role, "Viewer");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn inactive_user_or_role_fails_closed() {
        let (store, authz) = setup().await;
        let id = identity(&store, "u1", "Editor").await;
        store
            .update_user(
                &id.user_id,
                &UpdateUserRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let err = authz.authorize(Some(&id), &reports_read()).await.unwrap_err();
        assert!(matches!(err, AuthError::InactiveAccount));

        let id2 = identity(&store, "u2", "Viewer").await;
        store
            .update_role(
                &id2.role_id,
                &crate::types::UpdateRoleRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let err = authz.authorize(Some(&id2), &reports_read()).await.unwrap_err();
        assert!(matches!(err, AuthError::InactiveAccount));
    }

    #[tokio::test]
    async fn role_change_reaches_existing_token() {
        let (store, authz) = setup().await;
        let id = identity(&store, "u1", "Viewer").await;
        let req = Requirement::new("campaigns", Action::Create).unwrap();
        assert!(authz.authorize(Some(&id), &req).await.is_err());

        let editor = store.get_role_by_name("Editor").await.unwrap();
        store
            .update_user(
                &id.user_id,
                &UpdateUserRequest {
                    role_id: Some(editor.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // Same identity, still naming the old role.
        let ctx = authz.authorize(Some(&id), &req).await.unwrap();
        assert_eq!(ctx.principal().role_name, "Editor");
    }

    #[tokio::test]
    async fn superadmin_is_bypassed() {
        let (store, authz) = setup().await;
        let id = identity(&store, "root", "SuperAdmin").await;
        let req = Requirement::new("roles", Action::Delete).unwrap();
        let ctx = authz.authorize(Some(&id), &req).await.unwrap();
        assert_eq!(ctx.decision(), Decision::Bypassed);
    }
}
