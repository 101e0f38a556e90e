//! Owned business resources: campaigns, campaign data, cards, reports and
//! brands. Every table carries a nullable `owner_id`; reads only go through
//! a [`ScopedQuery`], and writes are keyed by id plus the owner that was
//! checked.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use adwarden_auth::{AuthError, Owned, ScopedQuery, Stampable};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Row, types::Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Campaigns,
    CampaignData,
    Cards,
    Reports,
    Brands,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Campaigns,
        ResourceKind::CampaignData,
        ResourceKind::Cards,
        ResourceKind::Reports,
        ResourceKind::Brands,
    ];

    /// Module name, which is also the table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Campaigns => "campaigns",
            ResourceKind::CampaignData => "campaign_data",
            ResourceKind::Cards => "cards",
            ResourceKind::Reports => "reports",
            ResourceKind::Brands => "brands",
        }
    }

    pub fn exportable(&self) -> bool {
        matches!(self, ResourceKind::CampaignData | ResourceKind::Reports)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AuthError::InvalidInput(format!("unknown resource kind '{s}'")))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub name: String,
    pub status: String,
    pub data: serde_json::Value,
    pub owner_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Owned for Resource {
    fn resource_kind(&self) -> &str {
        self.kind.as_str()
    }

    fn resource_id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewResource {
    pub name: String,
    pub status: Option<String>,
    pub data: Option<serde_json::Value>,
    /// Honoured only for privileged callers.
    pub owner_id: Option<String>,
}

impl Stampable for NewResource {
    fn requested_owner(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    fn set_owner(&mut self, owner_id: String) {
        self.owner_id = Some(owner_id);
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateResource {
    pub name: Option<String>,
    pub status: Option<String>,
    pub data: Option<serde_json::Value>,
    /// Reassignment; honoured only for privileged callers.
    pub owner_id: Option<String>,
}

/// Row counts of one resource kind, computed over the scoped rows only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub kind: ResourceKind,
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn migrate(&self) -> Result<(), AuthError>;
    async fn list(&self, query: &ScopedQuery) -> Result<Vec<Resource>, AuthError>;
    /// Unscoped single-row read; callers run the ownership check on the result.
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Resource, AuthError>;
    async fn create(&self, kind: ResourceKind, new: &NewResource) -> Result<Resource, AuthError>;
    /// Applies only while the row still has `expected_owner`.
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        expected_owner: Option<&str>,
        req: &UpdateResource,
    ) -> Result<Resource, AuthError>;
    async fn delete(
        &self,
        kind: ResourceKind,
        id: &str,
        expected_owner: Option<&str>,
    ) -> Result<(), AuthError>;
    /// Ownership predicate goes into `WHERE`, before `GROUP BY`.
    async fn summarize(&self, query: &ScopedQuery) -> Result<KindSummary, AuthError>;
    /// Assign every unassigned row of `kind` to `owner_id`.
    async fn backfill_unassigned(
        &self,
        kind: ResourceKind,
        owner_id: &str,
    ) -> Result<u64, AuthError>;
}

pub struct SqliteResourceStore {
    conn: Mutex<Connection>,
}

const COLUMNS: &str = "id, name, status, data, owner_id, created_at, updated_at";
const DEFAULT_STATUS: &str = "active";

fn resource_from_row(kind: ResourceKind, row: &Row<'_>) -> rusqlite::Result<Resource> {
    let id: String = row.get(0)?;
    let data: String = row.get(3)?;
    let data = serde_json::from_str(&data).map_err(|e| {
        tracing::warn!(kind = %kind, id = %id, error = %e, "corrupt data column");
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Resource {
        id,
        kind,
        name: row.get(1)?,
        status: row.get(2)?,
        data,
        owner_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// `WHERE` clause and bound values for a scoped query.
fn where_clause(query: &ScopedQuery) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    let owner = query.owner();
    if let Some(user_id) = owner.owner() {
        if let Some(cond) = owner.sql_condition("owner_id", &format!("?{}", params.len() + 1)) {
            clauses.push(cond);
            params.push(Value::Text(user_id.to_string()));
        }
    }
    if let Some(status) = &query.query().status {
        clauses.push(format!("status = ?{}", params.len() + 1));
        params.push(Value::Text(status.clone()));
    }
    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, params)
}

impl SqliteResourceStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &str) -> Result<Self, AuthError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        // Shares the file with the access store.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self::new(conn))
    }

    pub fn open_in_memory() -> Result<Self, AuthError> {
        Ok(Self::new(Connection::open_in_memory()?))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuthError> {
        self.conn
            .lock()
            .map_err(|_| AuthError::Internal("resource store lock poisoned".into()))
    }

    fn get_locked(conn: &Connection, kind: ResourceKind, id: &str) -> Result<Resource, AuthError> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM {kind} WHERE id = ?1"),
            [id],
            |row| resource_from_row(kind, row),
        )
        .optional()?
        .ok_or_else(|| AuthError::NotFound(format!("{kind} not found")))
    }
}

#[async_trait]
impl ResourceStore for SqliteResourceStore {
    async fn migrate(&self) -> Result<(), AuthError> {
        let conn = self.conn()?;
        for kind in ResourceKind::ALL {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {kind} (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT '{DEFAULT_STATUS}',
                    data TEXT NOT NULL DEFAULT '{{}}',
                    owner_id TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );
                CREATE INDEX IF NOT EXISTS idx_{kind}_owner ON {kind}(owner_id);"
            ))?;
        }
        Ok(())
    }

    async fn list(&self, query: &ScopedQuery) -> Result<Vec<Resource>, AuthError> {
        let kind: ResourceKind = query.query().kind.parse()?;
        let (filter, mut params) = where_clause(query);
        let mut sql =
            format!("SELECT {COLUMNS} FROM {kind}{filter} ORDER BY created_at DESC, id DESC");
        if let Some(limit) = query.query().limit {
            sql.push_str(&format!(
                " LIMIT ?{} OFFSET ?{}",
                params.len() + 1,
                params.len() + 2
            ));
            params.push(Value::Integer(limit as i64));
            params.push(Value::Integer(query.query().offset as i64));
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                resource_from_row(kind, row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Resource, AuthError> {
        let conn = self.conn()?;
        Self::get_locked(&conn, kind, id)
    }

    async fn create(&self, kind: ResourceKind, new: &NewResource) -> Result<Resource, AuthError> {
        let conn = self.conn()?;
        let id = uuid::Uuid::now_v7().to_string();
        let data = new
            .data
            .clone()
            .unwrap_or_else(|| serde_json::json!({}))
            .to_string();
        conn.execute(
            &format!(
                "INSERT INTO {kind} (id, name, status, data, owner_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            rusqlite::params![
                id,
                new.name,
                new.status.as_deref().unwrap_or(DEFAULT_STATUS),
                data,
                new.owner_id
            ],
        )?;
        Self::get_locked(&conn, kind, &id)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        expected_owner: Option<&str>,
        req: &UpdateResource,
    ) -> Result<Resource, AuthError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let current = tx
            .query_row(
                &format!("SELECT 1 FROM {kind} WHERE id = ?1 AND owner_id IS ?2"),
                rusqlite::params![id, expected_owner],
                |_| Ok(()),
            )
            .optional()?;
        if current.is_none() {
            return Err(AuthError::NotFound(format!("{kind} not found")));
        }
        if let Some(ref name) = req.name {
            tx.execute(
                &format!("UPDATE {kind} SET name = ?1, updated_at = datetime('now') WHERE id = ?2"),
                rusqlite::params![name, id],
            )?;
        }
        if let Some(ref status) = req.status {
            tx.execute(
                &format!("UPDATE {kind} SET status = ?1, updated_at = datetime('now') WHERE id = ?2"),
                rusqlite::params![status, id],
            )?;
        }
        if let Some(ref data) = req.data {
            tx.execute(
                &format!("UPDATE {kind} SET data = ?1, updated_at = datetime('now') WHERE id = ?2"),
                rusqlite::params![data.to_string(), id],
            )?;
        }
        if let Some(ref owner) = req.owner_id {
            tx.execute(
                &format!("UPDATE {kind} SET owner_id = ?1, updated_at = datetime('now') WHERE id = ?2"),
                rusqlite::params![owner, id],
            )?;
        }
        tx.commit()?;
        Self::get_locked(&conn, kind, id)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        id: &str,
        expected_owner: Option<&str>,
    ) -> Result<(), AuthError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!("DELETE FROM {kind} WHERE id = ?1 AND owner_id IS ?2"),
            rusqlite::params![id, expected_owner],
        )?;
        if changed == 0 {
            return Err(AuthError::NotFound(format!("{kind} not found")));
        }
        Ok(())
    }

    async fn summarize(&self, query: &ScopedQuery) -> Result<KindSummary, AuthError> {
        let kind: ResourceKind = query.query().kind.parse()?;
        let (filter, params) = where_clause(query);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT status, COUNT(*) FROM {kind}{filter} GROUP BY status ORDER BY status"
        ))?;
        let by_status = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(KindSummary {
            kind,
            total: by_status.values().sum(),
            by_status,
        })
    }

    async fn backfill_unassigned(
        &self,
        kind: ResourceKind,
        owner_id: &str,
    ) -> Result<u64, AuthError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {kind} SET owner_id = ?1, updated_at = datetime('now') WHERE owner_id IS NULL"
            ),
            [owner_id],
        )?;
        tracing::info!(kind = %kind, owner_id = %owner_id, rows = changed, "unassigned rows backfilled");
        Ok(changed as u64)
    }
}
