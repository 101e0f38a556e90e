use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub role_id: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    /// Privilege rank; higher is more privileged.
    pub level: i32,
    pub description: String,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    /// Conventional name, `{module}_{action}` or `{module}_*`.
    pub name: String,
    /// Module (category) the permission governs.
    pub module: String,
    /// Action name, or `*` for every action in the module.
    pub action: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleGrant {
    pub role_id: String,
    pub permission_id: String,
    pub granted_by: Option<String>,
    pub granted_at: String,
}

/// Result of granting a permission that may already be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    Created,
    AlreadyGranted,
}

/// A role together with the active permissions granted to it, as read in
/// one round trip by the resolver.
#[derive(Debug, Clone)]
pub struct RoleGrants {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

/// Verified identity handed over by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role_id: String,
}

/// Request-time principal with the role loaded from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: String,
    pub role_id: String,
    pub role_level: i32,
    pub role_name: String,
}

impl Principal {
    pub fn from_parts(user: &User, role: &Role) -> Self {
        Self {
            user_id: user.id.clone(),
            role_id: role.id.clone(),
            role_level: role.level,
            role_name: role.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub user_id: Option<String>,
    pub action: String,
    pub target: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: Option<String>,
    pub role_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub role_id: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub level: i32,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoleRequest {
    pub level: Option<i32>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub module: String,
    /// Action name or `*`.
    pub action: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct RolePermissionRequest {
    pub permission_id: String,
}
