use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row};

use super::AccessStore;
use crate::error::AuthError;
use crate::permissions::{ActionScope, PermissionKey, normalize_module};
use crate::registry::ModuleRegistry;
use crate::types::*;

pub struct SqliteAccessStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAccessStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn open(path: &str) -> Result<Self, AuthError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self::new(conn))
    }

    pub fn open_in_memory() -> Result<Self, AuthError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuthError> {
        lock(&self.conn)
    }

    /// Run `f` on the blocking pool. Reads on the authorization path go
    /// through here so the caller's deadline races a real await point.
    async fn blocking<T, F>(&self, f: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AuthError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&*lock(&conn)?))
            .await
            .map_err(|e| AuthError::Internal(format!("access store task failed: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, AuthError> {
    conn.lock()
        .map_err(|_| AuthError::Internal("access store lock poisoned".into()))
}

const MIGRATE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS access_roles (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    level INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS access_permissions (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    module TEXT NOT NULL,
    action TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_access_permissions_active_key
    ON access_permissions(module, action) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS access_role_permissions (
    role_id TEXT NOT NULL REFERENCES access_roles(id) ON DELETE CASCADE,
    permission_id TEXT NOT NULL REFERENCES access_permissions(id) ON DELETE CASCADE,
    granted_by TEXT,
    granted_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (role_id, permission_id)
);

CREATE TABLE IF NOT EXISTS access_users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE NOT NULL,
    email TEXT UNIQUE,
    role_id TEXT NOT NULL REFERENCES access_roles(id) ON DELETE RESTRICT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS access_audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT,
    action TEXT NOT NULL,
    target TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const USER_COLUMNS: &str = "id, username, email, role_id, is_active, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, level, description, is_active, created_at";
const PERMISSION_COLUMNS: &str = "id, name, module, action, description, is_active, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        role_id: row.get(3)?,
        is_active: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    role_at(row, 0)
}

fn role_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(base)?,
        name: row.get(base + 1)?,
        level: row.get(base + 2)?,
        description: row.get(base + 3)?,
        is_active: row.get::<_, i32>(base + 4)? != 0,
        created_at: row.get(base + 5)?,
    })
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: row.get(0)?,
        name: row.get(1)?,
        module: row.get(2)?,
        action: row.get(3)?,
        description: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: row.get(6)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.extended_code == 2067 || err.extended_code == 1555)
}

fn not_found(what: &'static str) -> impl Fn(rusqlite::Error) -> AuthError {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => AuthError::NotFound(format!("{what} not found")),
        other => AuthError::from(other),
    }
}

/// Canonical `(name, module, action)` for a new permission row.
pub(crate) fn permission_identity(
    module: &str,
    action: &str,
) -> Result<(String, String, String), AuthError> {
    let module = normalize_module(module)?;
    let scope: ActionScope = action.parse()?;
    let key = PermissionKey {
        module: module.clone(),
        scope,
    };
    Ok((key.name(), module, scope.to_string()))
}

#[async_trait]
impl AccessStore for SqliteAccessStore {
    async fn migrate(&self) -> Result<(), AuthError> {
        let conn = self.conn()?;
        conn.execute_batch(MIGRATE_SQL)?;
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
        let id = {
            let conn = self.conn()?;
            let role_exists = conn
                .query_row("SELECT 1 FROM access_roles WHERE id = ?1", [role_id], |_| {
                    Ok(())
                })
                .optional()?
                .is_some();
            if !role_exists {
                return Err(AuthError::InvalidInput(format!("role '{role_id}' does not exist")));
            }
            let id = uuid::Uuid::now_v7().to_string();
            conn.execute(
                "INSERT INTO access_users (id, username, email, role_id) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, username, email, role_id],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return AuthError::Duplicate(format!("user '{username}' already exists"));
                }
                AuthError::from(e)
            })?;
            id
        };
        self.get_user(&id).await
    }

    async fn get_user(&self, id: &str) -> Result<User, AuthError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM access_users WHERE id = ?1"),
            [id],
            user_from_row,
        )
        .map_err(not_found("user"))
    }

    async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM access_users ORDER BY created_at, username"
        ))?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    async fn update_user(&self, id: &str, req: &UpdateUserRequest) -> Result<User, AuthError> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let exists = tx
                .query_row("SELECT 1 FROM access_users WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Err(AuthError::NotFound("user not found".into()));
            }
            if let Some(ref email) = req.email {
                tx.execute(
                    "UPDATE access_users SET email = ?1, updated_at = datetime('now') WHERE id = ?2",
                    rusqlite::params![email, id],
                )?;
            }
            if let Some(ref role_id) = req.role_id {
                tx.execute(
                    "UPDATE access_users SET role_id = ?1, updated_at = datetime('now') WHERE id = ?2",
                    rusqlite::params![role_id, id],
                )
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(ref err, _)
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        AuthError::InvalidInput(format!("role '{role_id}' does not exist"))
                    }
                    other => AuthError::from(other),
                })?;
            }
            if let Some(is_active) = req.is_active {
                tx.execute(
                    "UPDATE access_users SET is_active = ?1, updated_at = datetime('now') WHERE id = ?2",
                    rusqlite::params![is_active as i32, id],
                )?;
            }
            tx.commit()?;
        }
        self.get_user(id).await
    }

    async fn load_principal(&self, user_id: &str) -> Result<(User, Role), AuthError> {
        let user_id = user_id.to_string();
        let row = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT u.id, u.username, u.email, u.role_id, u.is_active, u.created_at,
                            u.updated_at, r.id, r.name, r.level, r.description, r.is_active,
                            r.created_at
                     FROM access_users u
                     LEFT JOIN access_roles r ON r.id = u.role_id
                     WHERE u.id = ?1",
                    [&user_id],
                    |row| {
                        let user = user_from_row(row)?;
                        let role = match row.get::<_, Option<String>>(7)? {
                            Some(_) => Some(role_at(row, 7)?),
                            None => None,
                        };
                        Ok((user, role))
                    },
                )
                .map_err(not_found("user"))
            })
            .await?;
        match row {
            (user, Some(role)) => Ok((user, role)),
            (user, None) => Err(AuthError::Configuration(format!(
                "user '{}' references missing role '{}'",
                user.id, user.role_id
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
        let id = {
            let conn = self.conn()?;
            let id = uuid::Uuid::now_v7().to_string();
            conn.execute(
                "INSERT INTO access_roles (id, name, level, description) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, name, level, description],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return AuthError::Duplicate(format!("role '{name}' already exists"));
                }
                AuthError::from(e)
            })?;
            id
        };
        self.get_role(&id).await
    }

    async fn get_role(&self, id: &str) -> Result<Role, AuthError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ROLE_COLUMNS} FROM access_roles WHERE id = ?1"),
            [id],
            role_from_row,
        )
        .map_err(not_found("role"))
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Role, AuthError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {ROLE_COLUMNS} FROM access_roles WHERE name = ?1"),
            [name],
            role_from_row,
        )
        .map_err(not_found("role"))
    }

    async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROLE_COLUMNS} FROM access_roles ORDER BY level DESC, name"
        ))?;
        let roles = stmt
            .query_map([], role_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(roles)
    }

    async fn update_role(&self, id: &str, req: &UpdateRoleRequest) -> Result<Role, AuthError> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            let exists = tx
                .query_row("SELECT 1 FROM access_roles WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Err(AuthError::NotFound("role not found".into()));
            }
            if let Some(level) = req.level {
                tx.execute(
                    "UPDATE access_roles SET level = ?1 WHERE id = ?2",
                    rusqlite::params![level, id],
                )?;
            }
            if let Some(ref desc) = req.description {
                tx.execute(
                    "UPDATE access_roles SET description = ?1 WHERE id = ?2",
                    rusqlite::params![desc, id],
                )?;
            }
            if let Some(is_active) = req.is_active {
                tx.execute(
                    "UPDATE access_roles SET is_active = ?1 WHERE id = ?2",
                    rusqlite::params![is_active as i32, id],
                )?;
            }
            tx.commit()?;
        }
        self.get_role(id).await
    }

    async fn delete_role(&self, id: &str) -> Result<(), AuthError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let holders: i64 = tx.query_row(
            "SELECT COUNT(*) FROM access_users WHERE role_id = ?1",
            [id],
            |row| row.get(0),
        )?;
        if holders > 0 {
            return Err(AuthError::Conflict(format!(
                "role is assigned to {holders} user(s)"
            )));
        }
        let changed = tx.execute("DELETE FROM access_roles WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(AuthError::NotFound("role not found".into()));
        }
        tx.commit()?;
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
        let conn = self.conn()?;
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO access_permissions (id, name, module, action, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![id, name, module, action, description],
        )?;
        // Return existing or new
        conn.query_row(
            &format!("SELECT {PERMISSION_COLUMNS} FROM access_permissions WHERE name = ?1"),
            [&name],
            permission_from_row,
        )
        .map_err(AuthError::from)
    }

    async fn get_permission(&self, id: &str) -> Result<Permission, AuthError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {PERMISSION_COLUMNS} FROM access_permissions WHERE id = ?1"),
            [id],
            permission_from_row,
        )
        .map_err(not_found("permission"))
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, AuthError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PERMISSION_COLUMNS} FROM access_permissions ORDER BY module, action"
            ))?;
            let perms = stmt
                .query_map([], permission_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(perms)
        })
        .await
    }

    async fn set_permission_active(
        &self,
        id: &str,
        is_active: bool,
    ) -> Result<Permission, AuthError> {
        {
            let conn = self.conn()?;
            let changed = conn
                .execute(
                    "UPDATE access_permissions SET is_active = ?1 WHERE id = ?2",
                    rusqlite::params![is_active as i32, id],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        return AuthError::Duplicate(
                            "another active permission covers the same module and action".into(),
                        );
                    }
                    AuthError::from(e)
                })?;
            if changed == 0 {
                return Err(AuthError::NotFound("permission not found".into()));
            }
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
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let role = tx
            .query_row("SELECT 1 FROM access_roles WHERE id = ?1", [role_id], |_| Ok(()))
            .optional()?;
        if role.is_none() {
            return Err(AuthError::NotFound("role not found".into()));
        }
        let perm = tx
            .query_row(
                "SELECT 1 FROM access_permissions WHERE id = ?1",
                [permission_id],
                |_| Ok(()),
            )
            .optional()?;
        if perm.is_none() {
            return Err(AuthError::NotFound("permission not found".into()));
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO access_role_permissions (role_id, permission_id, granted_by)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![role_id, permission_id, granted_by],
        )?;
        tx.commit()?;
        Ok(if inserted == 0 {
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
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM access_role_permissions WHERE role_id = ?1 AND permission_id = ?2",
            rusqlite::params![role_id, permission_id],
        )?;
        Ok(changed > 0)
    }

    async fn list_role_permissions(&self, role_id: &str) -> Result<Vec<Permission>, AuthError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name, p.module, p.action, p.description, p.is_active, p.created_at
             FROM access_permissions p
             JOIN access_role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = ?1
             ORDER BY p.module, p.action",
        )?;
        let perms = stmt
            .query_map([role_id], permission_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(perms)
    }

    async fn list_role_grants(&self, role_id: &str) -> Result<Vec<RoleGrant>, AuthError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT role_id, permission_id, granted_by, granted_at
             FROM access_role_permissions WHERE role_id = ?1 ORDER BY granted_at",
        )?;
        let grants = stmt
            .query_map([role_id], |row| {
                Ok(RoleGrant {
                    role_id: row.get(0)?,
                    permission_id: row.get(1)?,
                    granted_by: row.get(2)?,
                    granted_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(grants)
    }

    async fn load_role_grants(&self, role_id: &str) -> Result<Option<RoleGrants>, AuthError> {
        let role_id = role_id.to_string();
        self.blocking(move |conn| {
            let role = conn
                .query_row(
                    &format!("SELECT {ROLE_COLUMNS} FROM access_roles WHERE id = ?1"),
                    [&role_id],
                    role_from_row,
                )
                .optional()?;
            let Some(role) = role else {
                return Ok(None);
            };
            let mut stmt = conn.prepare(
                "SELECT p.id, p.name, p.module, p.action, p.description, p.is_active, p.created_at
                 FROM access_permissions p
                 JOIN access_role_permissions rp ON rp.permission_id = p.id
                 WHERE rp.role_id = ?1 AND p.is_active = 1",
            )?;
            let permissions = stmt
                .query_map([&role_id], permission_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(RoleGrants { role, permissions }))
        })
        .await
    }

    // --- Audit ---

    async fn log_audit(
        &self,
        user_id: Option<&str>,
        action: &str,
        target: Option<&str>,
    ) -> Result<(), AuthError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO access_audit_log (user_id, action, target) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, action, target],
        )?;
        Ok(())
    }

    async fn list_audit(&self, limit: u32, offset: u32) -> Result<Vec<AuditEntry>, AuthError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, action, target, created_at
             FROM access_audit_log ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;
        let entries = stmt
            .query_map(rusqlite::params![limit, offset], |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    action: row.get(2)?,
                    target: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
