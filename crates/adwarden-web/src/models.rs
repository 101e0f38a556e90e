use adwarden_auth::{GrantOutcome, NavEntry, Permission, Role};
use serde::{Deserialize, Serialize};

use crate::resources::{KindSummary, Resource, ResourceKind};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize)]
pub struct ExportResponse {
    pub kind: ResourceKind,
    pub exported_at: String,
    pub count: usize,
    pub rows: Vec<Resource>,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    pub kinds: Vec<KindSummary>,
}

#[derive(Serialize)]
pub struct NavigationResponse {
    pub user_id: String,
    pub role: String,
    pub modules: Vec<NavEntry>,
    /// `module.action` pairs the role may perform.
    pub permissions: Vec<String>,
}

#[derive(Serialize)]
pub struct RoleDetailResponse {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(Serialize)]
pub struct GrantResponse {
    pub outcome: GrantOutcome,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub removed: bool,
}

#[derive(Serialize)]
pub struct ModuleResponse {
    pub name: String,
    pub label: String,
    pub order: u32,
    pub actions: Vec<String>,
}
