//! Administration of roles, permissions, grants and user role assignment.
//!
//! Every mutation that can change a permission decision follows the same
//! order: store write, cache invalidation, audit record, return. The write is
//! acknowledged only after the stale cache entry is gone.

use std::sync::Arc;

use crate::authorize::AccessContext;
use crate::error::AuthError;
use crate::permissions::PermissionKey;
use crate::resolver::PermissionResolver;
use crate::store::AccessStore;
use crate::types::*;

pub struct AccessAdmin {
    store: Arc<dyn AccessStore>,
    resolver: Arc<PermissionResolver>,
}

impl AccessAdmin {
    pub fn new(store: Arc<dyn AccessStore>, resolver: Arc<PermissionResolver>) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &Arc<dyn AccessStore> {
        &self.store
    }

    async fn audit(&self, actor: &AccessContext, action: &str, target: &str) {
        if let Err(e) = self
            .store
            .log_audit(Some(actor.user_id()), action, Some(target))
            .await
        {
            tracing::warn!(action = %action, target = %target, error = %e, "audit write failed");
        }
    }

    fn escalation(&self, actor: &AccessContext, op: &str, reason: &str) -> AuthError {
        let principal = actor.principal();
        tracing::warn!(
            user_id = %principal.user_id,
            role = %principal.role_name,
            operation = %op,
            reason = %reason,
            "privilege escalation refused"
        );
        AuthError::permission_denied(
            &actor.requirement().module,
            actor.requirement().action.as_str(),
            &principal.role_name,
        )
    }

    /// Refuse to hand out a role ranked above the actor's own.
    fn check_rank(&self, actor: &AccessContext, level: i32, op: &str) -> Result<(), AuthError> {
        let principal = actor.principal();
        if level > principal.role_level && !self.resolver.policy().is_superadmin(principal) {
            return Err(self.escalation(actor, op, &format!("target level {level}")));
        }
        Ok(())
    }

    /// Grant edits by non-superadmins: never on the actor's own role or a
    /// role ranked above it, and a grant may only pass on permissions the
    /// actor holds itself.
    async fn check_grant_scope(
        &self,
        actor: &AccessContext,
        role_id: &str,
        permission_id: &str,
        op: &str,
    ) -> Result<(), AuthError> {
        let principal = actor.principal();
        if self.resolver.policy().is_superadmin(principal) {
            return Ok(());
        }
        let role = self.store.get_role(role_id).await?;
        self.check_rank(actor, role.level, op)?;
        if role.id == principal.role_id {
            return Err(self.escalation(actor, op, "own role"));
        }
        if op == "role.grant" {
            let permission = self.store.get_permission(permission_id).await?;
            let keys = PermissionKey::from_permission(&permission);
            let held = self.resolver.resolve_role(&principal.role_id).await?;
            if keys.is_empty() || !keys.iter().all(|k| held.grants.includes(k)) {
                return Err(self.escalation(actor, op, "permission not held"));
            }
        }
        Ok(())
    }

    // --- Grants ---

    pub async fn grant(
        &self,
        actor: &AccessContext,
        role_id: &str,
        permission_id: &str,
    ) -> Result<GrantOutcome, AuthError> {
        self.check_grant_scope(actor, role_id, permission_id, "role.grant").await?;
        let outcome = self
            .store
            .grant_permission(role_id, permission_id, Some(actor.user_id()))
            .await?;
        self.resolver.invalidate_role(role_id);
        tracing::debug!(role_id = %role_id, permission_id = %permission_id, "role cache invalidated after grant");
        if outcome == GrantOutcome::Created {
            self.audit(
                actor,
                "role.grant",
                &format!("role:{role_id} permission:{permission_id}"),
            )
            .await;
        }
        Ok(outcome)
    }

    pub async fn revoke(
        &self,
        actor: &AccessContext,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, AuthError> {
        self.check_grant_scope(actor, role_id, permission_id, "role.revoke").await?;
        let removed = self.store.revoke_permission(role_id, permission_id).await?;
        self.resolver.invalidate_role(role_id);
        tracing::debug!(role_id = %role_id, permission_id = %permission_id, "role cache invalidated after revoke");
        if removed {
            self.audit(
                actor,
                "role.revoke",
                &format!("role:{role_id} permission:{permission_id}"),
            )
            .await;
        }
        Ok(removed)
    }

    // --- Roles ---

    pub async fn create_role(
        &self,
        actor: &AccessContext,
        req: &CreateRoleRequest,
    ) -> Result<Role, AuthError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidInput("role name required".into()));
        }
        if req.level < 0 {
            return Err(AuthError::InvalidInput("role level must not be negative".into()));
        }
        self.check_rank(actor, req.level, "role.create")?;
        let role = self
            .store
            .create_role(name, req.level, req.description.as_deref().unwrap_or(""))
            .await?;
        self.audit(actor, "role.create", &role.name).await;
        Ok(role)
    }

    pub async fn update_role(
        &self,
        actor: &AccessContext,
        id: &str,
        req: &UpdateRoleRequest,
    ) -> Result<Role, AuthError> {
        if let Some(level) = req.level {
            if level < 0 {
                return Err(AuthError::InvalidInput("role level must not be negative".into()));
            }
            self.check_rank(actor, level, "role.update")?;
        }
        let current = self.store.get_role(id).await?;
        self.check_rank(actor, current.level, "role.update")?;

        let role = self.store.update_role(id, req).await?;
        self.resolver.invalidate_role(id);
        self.audit(actor, "role.update", &role.name).await;
        Ok(role)
    }

    pub async fn delete_role(&self, actor: &AccessContext, id: &str) -> Result<(), AuthError> {
        let role = self.store.get_role(id).await?;
        self.check_rank(actor, role.level, "role.delete")?;
        self.store.delete_role(id).await?;
        self.resolver.invalidate_role(id);
        self.audit(actor, "role.delete", &role.name).await;
        Ok(())
    }

    // --- Permissions ---

    pub async fn create_permission(
        &self,
        actor: &AccessContext,
        req: &CreatePermissionRequest,
    ) -> Result<Permission, AuthError> {
        let perm = self
            .store
            .create_permission(
                &req.module,
                &req.action,
                req.description.as_deref().unwrap_or(""),
            )
            .await?;
        // A module's first permission closes a default-allow module.
        self.resolver.invalidate_all();
        self.audit(actor, "permission.create", &perm.name).await;
        Ok(perm)
    }

    pub async fn set_permission_active(
        &self,
        actor: &AccessContext,
        id: &str,
        is_active: bool,
    ) -> Result<Permission, AuthError> {
        let perm = self.store.set_permission_active(id, is_active).await?;
        self.resolver.invalidate_all();
        tracing::debug!(permission = %perm.name, is_active, "all role caches invalidated");
        let action = if is_active {
            "permission.enable"
        } else {
            "permission.disable"
        };
        self.audit(actor, action, &perm.name).await;
        Ok(perm)
    }

    // --- Users ---

    pub async fn create_user(
        &self,
        actor: &AccessContext,
        req: &CreateUserRequest,
    ) -> Result<User, AuthError> {
        let username = req.username.trim();
        if username.is_empty() {
            return Err(AuthError::InvalidInput("username required".into()));
        }
        let role = self.store.get_role(&req.role_id).await?;
        self.check_rank(actor, role.level, "user.create")?;
        let user = self
            .store
            .create_user(username, req.email.as_deref(), &role.id)
            .await?;
        self.audit(
            actor,
            "user.create",
            &format!("{} role:{}", user.username, role.name),
        )
        .await;
        Ok(user)
    }

    /// Role changes reach the user's live sessions on their next request,
    /// since the principal is loaded from the store every time.
    pub async fn update_user(
        &self,
        actor: &AccessContext,
        id: &str,
        req: &UpdateUserRequest,
    ) -> Result<User, AuthError> {
        let before = self.store.get_user(id).await?;
        let current_role = self.store.get_role(&before.role_id).await?;
        self.check_rank(actor, current_role.level, "user.update")?;
        if let Some(role_id) = &req.role_id {
            let role = self.store.get_role(role_id).await?;
            self.check_rank(actor, role.level, "user.update")?;
        }

        let user = self.store.update_user(id, req).await?;
        if before.role_id != user.role_id {
            self.audit(
                actor,
                "user.role_change",
                &format!("{} role:{}->{}", user.username, before.role_id, user.role_id),
            )
            .await;
        } else {
            self.audit(actor, "user.update", &user.username).await;
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessConfig;
    use crate::permissions::{Action, Requirement};
    use crate::registry::ModuleRegistry;
    use crate::resolver::Decision;
    use crate::store::SqliteAccessStore;

    struct Fixture {
        store: Arc<SqliteAccessStore>,
        resolver: Arc<PermissionResolver>,
        admin: AccessAdmin,
    }

    async fn setup() -> Fixture {
        let store = Arc::new(SqliteAccessStore::open_in_memory().unwrap());
        store.migrate().await.unwrap();
        let registry = Arc::new(ModuleRegistry::builtin().unwrap());
        store.seed_defaults(&registry).await.unwrap();
        let resolver = Arc::new(PermissionResolver::new(
            store.clone(),
            registry,
            &AccessConfig::default(),
        ));
        let admin = AccessAdmin::new(store.clone(), resolver.clone());
        Fixture {
            store,
            resolver,
            admin,
        }
    }

    fn actor(level: i32, role: &str) -> AccessContext {
        AccessContext::new(
            Principal {
                user_id: "actor".into(),
                role_id: "actor-role".into(),
                role_level: level,
                role_name: role.into(),
            },
            Requirement::new("roles", Action::Update).unwrap(),
            Decision::Granted,
        )
    }

    async fn permission_id(store: &SqliteAccessStore, name: &str) -> String {
        store
            .list_permissions()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn advertiser_cards_read_grant_and_revoke() {
        let f = setup().await;
        let adv = f.store.get_role_by_name("Advertiser").await.unwrap();
        let cards_read = permission_id(&f.store, "cards_read").await;
        let root = actor(10, "SuperAdmin");

        // Warm the cache with the denial first.
        assert!(!f.resolver.has_permission(&adv.id, "cards", "read").await.unwrap());

        let outcome = f.admin.grant(&root, &adv.id, &cards_read).await.unwrap();
        assert_eq!(outcome, GrantOutcome::Created);
        assert!(f.resolver.has_permission(&adv.id, "cards", "read").await.unwrap());

        assert!(f.admin.revoke(&root, &adv.id, &cards_read).await.unwrap());
        assert!(!f.resolver.has_permission(&adv.id, "cards", "read").await.unwrap());
    }

    #[tokio::test]
    async fn granting_twice_reports_already_granted() {
        let f = setup().await;
        let adv = f.store.get_role_by_name("Advertiser").await.unwrap();
        let cards_read = permission_id(&f.store, "cards_read").await;
        let root = actor(10, "SuperAdmin");

        f.admin.grant(&root, &adv.id, &cards_read).await.unwrap();
        let again = f.admin.grant(&root, &adv.id, &cards_read).await.unwrap();
        assert_eq!(again, GrantOutcome::AlreadyGranted);

        let rows = f.store.list_role_grants(&adv.id).await.unwrap();
        assert_eq!(rows.iter().filter(|g| g.permission_id == cards_read).count(), 1);

        let audit = f.store.list_audit(50, 0).await.unwrap();
        assert_eq!(audit.iter().filter(|e| e.action == "role.grant").count(), 1);
    }

    #[tokio::test]
    async fn disabling_a_permission_takes_effect_immediately() {
        let f = setup().await;
        let viewer = f.store.get_role_by_name("Viewer").await.unwrap();
        let reports_read = permission_id(&f.store, "reports_read").await;
        assert!(f.resolver.has_permission(&viewer.id, "reports", "read").await.unwrap());

        f.admin
            .set_permission_active(&actor(10, "SuperAdmin"), &reports_read, false)
            .await
            .unwrap();
        assert!(!f.resolver.has_permission(&viewer.id, "reports", "read").await.unwrap());
        // Grant row is untouched.
        assert!(
            f.store
                .list_role_grants(&viewer.id)
                .await
                .unwrap()
                .iter()
                .any(|g| g.permission_id == reports_read)
        );
    }

    #[tokio::test]
    async fn disabling_a_role_denies_immediately() {
        let f = setup().await;
        let editor = f.store.get_role_by_name("Editor").await.unwrap();
        assert!(f.resolver.has_permission(&editor.id, "cards", "create").await.unwrap());

        f.admin
            .update_role(
                &actor(10, "SuperAdmin"),
                &editor.id,
                &UpdateRoleRequest {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!f.resolver.has_permission(&editor.id, "cards", "create").await.unwrap());
    }

    #[tokio::test]
    async fn admin_cannot_mint_superadmin_role() {
        let f = setup().await;
        let err = f
            .admin
            .create_role(
                &actor(8, "Admin"),
                &CreateRoleRequest {
                    name: "Root2".into(),
                    level: 10,
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        assert!(f.store.get_role_by_name("Root2").await.is_err());
    }

    #[tokio::test]
    async fn admin_cannot_promote_user_to_superadmin() {
        let f = setup().await;
        let viewer = f.store.get_role_by_name("Viewer").await.unwrap();
        let sa = f.store.get_role_by_name("SuperAdmin").await.unwrap();
        let user = f.store.create_user("u1", None, &viewer.id).await.unwrap();

        let err = f
            .admin
            .update_user(
                &actor(8, "Admin"),
                &user.id,
                &UpdateUserRequest {
                    role_id: Some(sa.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));

        let updated = f
            .admin
            .update_user(
                &actor(10, "SuperAdmin"),
                &user.id,
                &UpdateUserRequest {
                    role_id: Some(sa.id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.role_id, sa.id);
        let audit = f.store.list_audit(10, 0).await.unwrap();
        assert_eq!(audit[0].action, "user.role_change");
    }

    #[tokio::test]
    async fn new_permission_closes_default_allow_module() {
        let f = setup().await;
        let viewer = f.store.get_role_by_name("Viewer").await.unwrap();
        assert!(f.resolver.has_permission(&viewer.id, "navigation", "read").await.unwrap());

        f.admin
            .create_permission(
                &actor(10, "SuperAdmin"),
                &CreatePermissionRequest {
                    module: "navigation".into(),
                    action: "read".into(),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert!(!f.resolver.has_permission(&viewer.id, "navigation", "read").await.unwrap());
    }

    #[tokio::test]
    async fn delete_assigned_role_conflicts() {
        let f = setup().await;
        let role = f
            .admin
            .create_role(
                &actor(10, "SuperAdmin"),
                &CreateRoleRequest {
                    name: "Temp".into(),
                    level: 2,
                    description: None,
                },
            )
            .await
            .unwrap();
        f.store.create_user("u1", None, &role.id).await.unwrap();
        let err = f
            .admin
            .delete_role(&actor(10, "SuperAdmin"), &role.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    /// A level-5 role holding `roles_update` and `cards_read`, and an actor in it.
    async fn manager(f: &Fixture) -> (Role, AccessContext) {
        let role = f.store.create_role("Manager", 5, "").await.unwrap();
        for name in ["roles_update", "cards_read"] {
            let pid = permission_id(&f.store, name).await;
            f.store.grant_permission(&role.id, &pid, None).await.unwrap();
        }
        let ctx = AccessContext::new(
            Principal {
                user_id: "mgr".into(),
                role_id: role.id.clone(),
                role_level: role.level,
                role_name: role.name.clone(),
            },
            Requirement::new("roles", Action::Update).unwrap(),
            Decision::Granted,
        );
        (role, ctx)
    }

    #[tokio::test]
    async fn role_cannot_grant_itself_more() {
        let f = setup().await;
        let (mgr, ctx) = manager(&f).await;
        let users_all = permission_id(&f.store, "users_*").await;
        let cards_read = permission_id(&f.store, "cards_read").await;

        let err = f.admin.grant(&ctx, &mgr.id, &users_all).await.unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        // Even a permission it already holds.
        let err = f.admin.grant(&ctx, &mgr.id, &cards_read).await.unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        assert!(!f.resolver.has_permission(&mgr.id, "users", "create").await.unwrap());
    }

    #[tokio::test]
    async fn grant_limited_to_permissions_the_actor_holds() {
        let f = setup().await;
        let (_, ctx) = manager(&f).await;
        let viewer = f.store.get_role_by_name("Viewer").await.unwrap();
        let users_create = permission_id(&f.store, "users_create").await;
        let cards_read = permission_id(&f.store, "cards_read").await;

        let err = f
            .admin
            .grant(&ctx, &viewer.id, &users_create)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        assert!(!f.resolver.has_permission(&viewer.id, "users", "create").await.unwrap());

        let outcome = f.admin.grant(&ctx, &viewer.id, &cards_read).await.unwrap();
        assert_eq!(outcome, GrantOutcome::Created);
        assert!(f.admin.revoke(&ctx, &viewer.id, &cards_read).await.unwrap());
    }

    #[tokio::test]
    async fn grants_of_higher_roles_are_out_of_reach() {
        let f = setup().await;
        let (_, ctx) = manager(&f).await;
        let root_role = f.store.get_role_by_name("SuperAdmin").await.unwrap();
        let admin_role = f.store.get_role_by_name("Admin").await.unwrap();
        let cards_read = permission_id(&f.store, "cards_read").await;
        let cards_all = permission_id(&f.store, "cards_*").await;

        let err = f
            .admin
            .revoke(&ctx, &root_role.id, &cards_read)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        let err = f
            .admin
            .revoke(&ctx, &admin_role.id, &cards_all)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { .. }));
        assert!(f.resolver.has_permission(&admin_role.id, "cards", "delete").await.unwrap());

        let audit = f.store.list_audit(50, 0).await.unwrap();
        assert!(audit.iter().all(|e| e.action != "role.revoke"));
    }
}
