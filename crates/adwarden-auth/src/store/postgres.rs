#![cfg(feature = "postgres")]

use async_trait::async_trait;
use sqlx::PgPool;

use super::AccessStore;
use super::sqlite::permission_identity;
use crate::error::AuthError;
use crate::registry::ModuleRegistry;
use crate::types::*;

pub struct PostgresAccessStore {
    pool: PgPool,
}

impl PostgresAccessStore {
    pub async fn new(database_url: &str) -> Result<Self, AuthError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| AuthError::StorageUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }
}

const MIGRATE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS access_roles (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    level INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS access_permissions (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    module TEXT NOT NULL,
    action TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_access_permissions_active_key
    ON access_permissions(module, action) WHERE is_active;

CREATE TABLE IF NOT EXISTS access_role_permissions (
    role_id TEXT NOT NULL REFERENCES access_roles(id) ON DELETE CASCADE,
    permission_id TEXT NOT NULL REFERENCES access_permissions(id) ON DELETE CASCADE,
    granted_by TEXT,
    granted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS access_users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    email TEXT UNIQUE,
    role_id TEXT NOT NULL REFERENCES access_roles(id) ON DELETE RESTRICT,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS access_audit_log (
    id BIGSERIAL PRIMARY KEY,
    user_id TEXT,
    action TEXT NOT NULL,
    target TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

type UserRow = (String, String, Option<String>, String, bool, String, String);
type RoleRow = (String, String, i32, String, bool, String);
type PermissionRow = (String, String, String, String, String, bool, String);

const USER_COLUMNS: &str =
    "id, username, email, role_id, is_active, created_at::text, updated_at::text";
const ROLE_COLUMNS: &str = "id, name, level, description, is_active, created_at::text";
const PERMISSION_COLUMNS: &str =
    "id, name, module, action, description, is_active, created_at::text";

fn user(r: UserRow) -> User {
    User {
        id: r.0,
        username: r.1,
        email: r.2,
        role_id: r.3,
        is_active: r.4,
        created_at: r.5,
        updated_at: r.6,
    }
}

fn role(r: RoleRow) -> Role {
    Role {
        id: r.0,
        name: r.1,
        level: r.2,
        description: r.3,
        is_active: r.4,
        created_at: r.5,
    }
}

fn permission(r: PermissionRow) -> Permission {
    Permission {
        id: r.0,
        name: r.1,
        module: r.2,
        action: r.3,
        description: r.4,
        is_active: r.5,
        created_at: r.6,
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(d) if d.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(d) if d.is_foreign_key_violation())
}

#[async_trait]
impl AccessStore for PostgresAccessStore {
    async fn migrate(&self) -> Result<(), AuthError> {
        sqlx::raw_sql(MIGRATE_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn seed_defaults(&self, registry: &ModuleRegistry) -> Result<(), AuthError> {
        super::seed::seed_defaults(self, registry).await
    }

    // --- Users ---

    async fn create_user(
        &self,
        username: &str,
        email: Option<&str>,
        role_id: &str,
    ) -> Result<User, AuthError> {
        let id = uuid::Uuid::now_v7().to_string();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO access_users (id, username, email, role_id)
             VALUES ($1, $2, $3, $4)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&id)
        .bind(username)
        .bind(email)
        .bind(role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AuthError::Duplicate(format!("user '{username}' already exists"))
            } else if is_foreign_key_violation(&e) {
                AuthError::InvalidInput(format!("role '{role_id}' does not exist"))
            } else {
                AuthError::from(e)
            }
        })?;
        Ok(user(row))
    }

    async fn get_user(&self, id: &str) -> Result<User, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM access_users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuthError::NotFound("user not found".into()))?;
        Ok(user(row))
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM access_users ORDER BY created_at, username"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(user).collect())
    }

    async fn update_user(&self, id: &str, req: &UpdateUserRequest) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query_as::<_, (i32,)>("SELECT 1 FROM access_users WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AuthError::NotFound("user not found".into()));
        }
        if let Some(ref email) = req.email {
            sqlx::query("UPDATE access_users SET email = $1, updated_at = NOW() WHERE id = $2")
                .bind(email)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(ref role_id) = req.role_id {
            sqlx::query("UPDATE access_users SET role_id = $1, updated_at = NOW() WHERE id = $2")
                .bind(role_id)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_foreign_key_violation(&e) {
                        AuthError::InvalidInput(format!("role '{role_id}' does not exist"))
                    } else {
                        AuthError::from(e)
                    }
                })?;
        }
        if let Some(is_active) = req.is_active {
            sqlx::query("UPDATE access_users SET is_active = $1, updated_at = NOW() WHERE id = $2")
                .bind(is_active)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.get_user(id).await
    }

    async fn load_principal(&self, user_id: &str) -> Result<(User, Role), AuthError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                Option<String>,
                String,
                bool,
                String,
                String,
                Option<String>,
                Option<String>,
                Option<i32>,
                Option<String>,
                Option<bool>,
                Option<String>,
            ),
        >(
            "SELECT u.id, u.username, u.email, u.role_id, u.is_active,
                    u.created_at::text, u.updated_at::text,
                    r.id, r.name, r.level, r.description, r.is_active, r.created_at::text
             FROM access_users u
             LEFT JOIN access_roles r ON r.id = u.role_id
             WHERE u.id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuthError::NotFound("user not found".into()))?;

        let u = user((row.0, row.1, row.2, row.3, row.4, row.5, row.6));
        match (row.7, row.8, row.9, row.10, row.11, row.12) {
            (Some(id), Some(name), Some(level), Some(description), Some(is_active), Some(created_at)) => {
                let r = role((id, name, level, description, is_active, created_at));
                Ok((u, r))
            }
            _ => Err(AuthError::Configuration(format!(
                "user '{}' references missing role '{}'",
                u.id, u.role_id
            ))),
        }
    }

    // --- Roles ---

    async fn create_role(
        &self,
        name: &str,
        level: i32,
        description: &str,
    ) -> Result<Role, AuthError> {
        let id = uuid::Uuid::now_v7().to_string();
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "INSERT INTO access_roles (id, name, level, description)
             VALUES ($1, $2, $3, $4)
             RETURNING {ROLE_COLUMNS}"
        ))
        .bind(&id)
        .bind(name)
        .bind(level)
        .bind(description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AuthError::Duplicate(format!("role '{name}' already exists"))
            } else {
                AuthError::from(e)
            }
        })?;
        Ok(role(row))
    }

    async fn get_role(&self, id: &str) -> Result<Role, AuthError> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM access_roles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuthError::NotFound("role not found".into()))?;
        Ok(role(row))
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Role, AuthError> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM access_roles WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuthError::NotFound("role not found".into()))?;
        Ok(role(row))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        let rows = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM access_roles ORDER BY level DESC, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(role).collect())
    }

    async fn update_role(&self, id: &str, req: &UpdateRoleRequest) -> Result<Role, AuthError> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query_as::<_, (i32,)>("SELECT 1 FROM access_roles WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AuthError::NotFound("role not found".into()));
        }
        if let Some(level) = req.level {
            sqlx::query("UPDATE access_roles SET level = $1 WHERE id = $2")
                .bind(level)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(ref desc) = req.description {
            sqlx::query("UPDATE access_roles SET description = $1 WHERE id = $2")
                .bind(desc)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        if let Some(is_active) = req.is_active {
            sqlx::query("UPDATE access_roles SET is_active = $1 WHERE id = $2")
                .bind(is_active)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.get_role(id).await
    }

    async fn delete_role(&self, id: &str) -> Result<(), AuthError> {
        let mut tx = self.pool.begin().await?;
        let locked = sqlx::query_as::<_, (i32,)>("SELECT 1 FROM access_roles WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(AuthError::NotFound("role not found".into()));
        }
        let (holders,) =
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM access_users WHERE role_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if holders > 0 {
            return Err(AuthError::Conflict(format!(
                "role is assigned to {holders} user(s)"
            )));
        }
        sqlx::query("DELETE FROM access_roles WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // --- Permissions ---

    async fn create_permission(
        &self,
        module: &str,
        action: &str,
        description: &str,
    ) -> Result<Permission, AuthError> {
        let (name, module, action) = permission_identity(module, action)?;
        let id = uuid::Uuid::now_v7().to_string();
        sqlx::query(
            "INSERT INTO access_permissions (id, name, module, action, description)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT DO NOTHING",
        )
        .bind(&id)
        .bind(&name)
        .bind(&module)
        .bind(&action)
        .bind(description)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM access_permissions WHERE name = $1"
        ))
        .bind(&name)
        .fetch_one(&self.pool)
        .await?;
        Ok(permission(row))
    }

    async fn get_permission(&self, id: &str) -> Result<Permission, AuthError> {
        let row = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM access_permissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AuthError::NotFound("permission not found".into()))?;
        Ok(permission(row))
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, AuthError> {
        let rows = sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM access_permissions ORDER BY module, action"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(permission).collect())
    }

    async fn set_permission_active(
        &self,
        id: &str,
        is_active: bool,
    ) -> Result<Permission, AuthError> {
        let result = sqlx::query("UPDATE access_permissions SET is_active = $1 WHERE id = $2")
            .bind(is_active)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AuthError::Duplicate(
                        "another active permission covers the same module and action".into(),
                    )
                } else {
                    AuthError::from(e)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound("permission not found".into()));
        }
        self.get_permission(id).await
    }

    // --- Role-Permission ---

    async fn grant_permission(
        &self,
        role_id: &str,
        permission_id: &str,
        granted_by: Option<&str>,
    ) -> Result<GrantOutcome, AuthError> {
        let mut tx = self.pool.begin().await?;
        // Row lock on the role serializes grant writes per role.
        let role = sqlx::query_as::<_, (i32,)>("SELECT 1 FROM access_roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .fetch_optional(&mut *tx)
            .await?;
        if role.is_none() {
            return Err(AuthError::NotFound("role not found".into()));
        }
        let perm = sqlx::query_as::<_, (i32,)>("SELECT 1 FROM access_permissions WHERE id = $1")
            .bind(permission_id)
            .fetch_optional(&mut *tx)
            .await?;
        if perm.is_none() {
            return Err(AuthError::NotFound("permission not found".into()));
        }
        let result = sqlx::query(
            "INSERT INTO access_role_permissions (role_id, permission_id, granted_by)
             VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .bind(granted_by)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(if result.rows_affected() == 0 {
            GrantOutcome::AlreadyGranted
        } else {
            GrantOutcome::Created
        })
    }

    async fn revoke_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<bool, AuthError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT 1 FROM access_roles WHERE id = $1 FOR UPDATE")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(
            "DELETE FROM access_role_permissions WHERE role_id = $1 AND permission_id = $2",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_role_permissions(&self, role_id: &str) -> Result<Vec<Permission>, AuthError> {
        let rows = sqlx::query_as::<_, PermissionRow>(
            "SELECT p.id, p.name, p.module, p.action, p.description, p.is_active, p.created_at::text
             FROM access_permissions p
             JOIN access_role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = $1
             ORDER BY p.module, p.action",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(permission).collect())
    }

    async fn list_role_grants(&self, role_id: &str) -> Result<Vec<RoleGrant>, AuthError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, String)>(
            "SELECT role_id, permission_id, granted_by, granted_at::text
             FROM access_role_permissions WHERE role_id = $1 ORDER BY granted_at",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| RoleGrant {
                role_id: r.0,
                permission_id: r.1,
                granted_by: r.2,
                granted_at: r.3,
            })
            .collect())
    }

    async fn load_role_grants(&self, role_id: &str) -> Result<Option<RoleGrants>, AuthError> {
        let Some(row) = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM access_roles WHERE id = $1"
        ))
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let perms = sqlx::query_as::<_, PermissionRow>(
            "SELECT p.id, p.name, p.module, p.action, p.description, p.is_active, p.created_at::text
             FROM access_permissions p
             JOIN access_role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = $1 AND p.is_active",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(RoleGrants {
            role: role(row),
            permissions: perms.into_iter().map(permission).collect(),
        }))
    }

    // --- Audit ---

    async fn log_audit(
        &self,
        user_id: Option<&str>,
        action: &str,
        target: Option<&str>,
    ) -> Result<(), AuthError> {
        sqlx::query("INSERT INTO access_audit_log (user_id, action, target) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(action)
            .bind(target)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_audit(&self, limit: u32, offset: u32) -> Result<Vec<AuditEntry>, AuthError> {
        let rows = sqlx::query_as::<_, (i64, Option<String>, String, Option<String>, String)>(
            "SELECT id, user_id, action, target, created_at::text
             FROM access_audit_log ORDER BY id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AuditEntry {
                id: r.0,
                user_id: r.1,
                action: r.2,
                target: r.3,
                created_at: r.4,
            })
            .collect())
    }
}
