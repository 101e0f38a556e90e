pub mod seed;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use sqlite::SqliteAccessStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresAccessStore;

use async_trait::async_trait;

use crate::error::AuthError;
use crate::registry::ModuleRegistry;
use crate::types::*;

/// Persistence for users, roles, permissions, grants and the audit log.
///
/// Implementations serialize grant writes per role using the database's own
/// transactions; cache invalidation is the caller's job (see
/// [`crate::admin::AccessAdmin`]).
#[async_trait]
pub trait AccessStore: Send + Sync {
    // Users
    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        role_id: &str,
    ) -> Result<User, AuthError>;
    async fn get_user(&self, id: &str) -> Result<User, AuthError>;
    async fn list_users(&self) -> Result<Vec<User>, AuthError>;
    async fn update_user(&self, id: &str, req: &UpdateUserRequest) -> Result<User, AuthError>;

    /// User and current role in one read. The role comes from the store, not
    /// from the token, so role changes reach live sessions on their next request.
    async fn load_principal(&self, user_id: &str) -> Result<(User, Role), AuthError>;

    // Roles
    async fn create_role(
        &self,
        name: &str,
        level: i32,
        description: &str,
    ) -> Result<Role, AuthError>;
    async fn get_role(&self, id: &str) -> Result<Role, AuthError>;
    async fn get_role_by_name(&self, name: &str) -> Result<Role, AuthError>;
    async fn list_roles(&self) -> Result<Vec<Role>, AuthError>;
    async fn update_role(&self, id: &str, req: &UpdateRoleRequest) -> Result<Role, AuthError>;
    /// Refused with [`AuthError::Conflict`] while any user holds the role.
    async fn delete_role(&self, id: &str) -> Result<(), AuthError>;

    // Permissions
    /// Idempotent on the permission name; returns the existing row if present.
    async fn create_permission(
        &self,
        module: &str,
        action: &str,
        description: &str,
    ) -> Result<Permission, AuthError>;
    async fn get_permission(&self, id: &str) -> Result<Permission, AuthError>;
    async fn list_permissions(&self) -> Result<Vec<Permission>, AuthError>;
    async fn set_permission_active(
        &self,
        id: &str,
        is_active: bool,
    ) -> Result<Permission, AuthError>;

    // Role-Permission
    async fn grant_permission(
        &self,
        role_id: &str,
        permission_id: &str,
        granted_by: Option<&str>,
    ) -> Result<GrantOutcome, AuthError>;
    /// Returns whether a grant row was removed.
    async fn revoke_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, AuthError>;
    async fn list_role_permissions(&self, role_id: &str) -> Result<Vec<Permission>, AuthError>;
    async fn list_role_grants(&self, role_id: &str) -> Result<Vec<RoleGrant>, AuthError>;
    /// The role and its granted *active* permissions, `None` if the role
    /// does not exist.
    async fn load_role_grants(&self, role_id: &str) -> Result<Option<RoleGrants>, AuthError>;

    // Audit
    async fn log_audit(
        &self,
        user_id: Option<&str>,
        action: &str,
        target: Option<&str>,
    ) -> Result<(), AuthError>;
    async fn list_audit(&self, limit: u32, offset: u32) -> Result<Vec<AuditEntry>, AuthError>;

    // Lifecycle
    async fn migrate(&self) -> Result<(), AuthError>;
    async fn seed_defaults(&self, registry: &ModuleRegistry) -> Result<(), AuthError>;
}
