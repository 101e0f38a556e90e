//! Typed `(module, action)` permission keys and grant matching.
//!
//! Permission rows have been recorded two ways over time: by exact name
//! (`cards_read`) and by category plus a wildcard name (`cards_*`). Both are
//! parsed into [`PermissionKey`] values here and compared structurally, so
//! nothing downstream depends on string concatenation.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::Permission;

/// An operation within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Export,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" | "view" => Ok(Action::Read),
            "create" => Ok(Action::Create),
            "update" | "edit" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "export" => Ok(Action::Export),
            other => Err(AuthError::InvalidInput(format!("unknown action '{other}'"))),
        }
    }
}

/// What a granted permission covers within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    Exact(Action),
    Any,
}

impl ActionScope {
    pub fn covers(&self, action: Action) -> bool {
        match self {
            ActionScope::Any => true,
            ActionScope::Exact(a) => *a == action,
        }
    }
}

impl fmt::Display for ActionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionScope::Exact(a) => a.fmt(f),
            ActionScope::Any => f.write_str("*"),
        }
    }
}

impl FromStr for ActionScope {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == "*" {
            Ok(ActionScope::Any)
        } else {
            s.parse().map(ActionScope::Exact)
        }
    }
}

/// A concrete requirement: one action on one module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Requirement {
    pub module: String,
    pub action: Action,
}

impl Requirement {
    pub fn new(module: &str, action: Action) -> Result<Self, AuthError> {
        Ok(Self {
            module: normalize_module(module)?,
            action,
        })
    }

    /// Parse `module` and `action` strings as they arrive from callers.
    pub fn parse(module: &str, action: &str) -> Result<Self, AuthError> {
        if action.trim().is_empty() {
            return Err(AuthError::InvalidInput("action is required".into()));
        }
        Self::new(module, action.parse()?)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.action)
    }
}

/// A granted capability: an action scope on one module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionKey {
    pub module: String,
    pub scope: ActionScope,
}

impl PermissionKey {
    pub fn exact(module: &str, action: Action) -> Self {
        Self {
            module: module.to_string(),
            scope: ActionScope::Exact(action),
        }
    }

    pub fn any(module: &str) -> Self {
        Self {
            module: module.to_string(),
            scope: ActionScope::Any,
        }
    }

    pub fn covers(&self, req: &Requirement) -> bool {
        self.module == req.module && self.scope.covers(req.action)
    }

    /// Conventional permission name, `{module}_{action}` or `{module}_*`.
    pub fn name(&self) -> String {
        format!("{}_{}", self.module, self.scope)
    }

    /// Parse a conventional permission name. Module names may contain
    /// underscores (`campaign_data_read`), so the action is the last segment.
    pub fn parse_name(name: &str) -> Option<Self> {
        let (module, action) = name.trim().rsplit_once('_')?;
        if module.is_empty() {
            return None;
        }
        let scope = action.parse().ok()?;
        Some(Self {
            module: module.to_ascii_lowercase(),
            scope,
        })
    }

    /// Every key a permission row stands for. Rows seeded by name and rows
    /// seeded by category/action both resolve; a row whose columns and name
    /// disagree yields both readings.
    pub fn from_permission(p: &Permission) -> Vec<PermissionKey> {
        let mut keys = Vec::with_capacity(2);
        if let Some(k) = Self::parse_name(&p.name) {
            keys.push(k);
        }
        if let (Ok(module), Ok(scope)) = (
            normalize_module(&p.module),
            p.action.parse::<ActionScope>(),
        ) {
            let k = PermissionKey { module, scope };
            if !keys.contains(&k) {
                keys.push(k);
            }
        }
        keys
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.scope)
    }
}

/// The set of keys a role has been granted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet {
    keys: BTreeSet<PermissionKey>,
}

impl GrantSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from granted permission rows; inactive rows are skipped.
    pub fn from_permissions<'a>(perms: impl IntoIterator<Item = &'a Permission>) -> Self {
        let keys = perms
            .into_iter()
            .filter(|p| p.is_active)
            .flat_map(PermissionKey::from_permission)
            .collect();
        Self { keys }
    }

    pub fn allows(&self, req: &Requirement) -> bool {
        self.keys.iter().any(|k| k.covers(req))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `true` when `key` is held as is or through its module wildcard.
    pub fn includes(&self, key: &PermissionKey) -> bool {
        self.keys.iter().any(|k| {
            k.module == key.module && (k.scope == ActionScope::Any || k.scope == key.scope)
        })
    }

    /// Expand wildcard scopes into concrete requirements.
    pub fn requirements(&self) -> BTreeSet<Requirement> {
        let mut out = BTreeSet::new();
        for key in &self.keys {
            match key.scope {
                ActionScope::Exact(action) => {
                    out.insert(Requirement {
                        module: key.module.clone(),
                        action,
                    });
                }
                ActionScope::Any => {
                    for action in Action::ALL {
                        out.insert(Requirement {
                            module: key.module.clone(),
                            action,
                        });
                    }
                }
            }
        }
        out
    }
}

impl FromIterator<PermissionKey> for GrantSet {
    fn from_iter<I: IntoIterator<Item = PermissionKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

pub fn normalize_module(module: &str) -> Result<String, AuthError> {
    let m = module.trim().to_ascii_lowercase();
    if m.is_empty() {
        return Err(AuthError::InvalidInput("module is required".into()));
    }
    if !m.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AuthError::InvalidInput(format!("invalid module name '{module}'")));
    }
    Ok(m)
}
