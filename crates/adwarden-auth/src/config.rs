use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::registry::ModuleDef;
use crate::types::Principal;

/// Access-control settings, the `[access]` table of the server config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessConfig {
    /// Roles at or above this level bypass every permission and ownership check.
    #[serde(default = "default_superadmin_level")]
    pub superadmin_level: i32,
    /// Roles at or above this level see and mutate every row of owned resources.
    #[serde(default = "default_admin_level")]
    pub admin_level: i32,
    /// Lifetime of a cached role grant set. 0 disables caching.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Maximum number of roles kept in the permission cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Store calls made while authorizing a request fail closed after this long.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Modules that stay open while they have no active permission at all.
    #[serde(default = "default_allow_modules")]
    pub default_allow_modules: Vec<String>,
    /// Rows with no owner are visible only to privileged principals.
    #[serde(default = "default_true")]
    pub treat_unassigned_as_privileged_only: bool,
    /// Replaces the built-in module registry when non-empty.
    #[serde(default)]
    pub modules: Vec<ModuleDef>,
}

fn default_superadmin_level() -> i32 {
    10
}
fn default_admin_level() -> i32 {
    8
}
fn default_cache_ttl_secs() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    256
}
fn default_store_timeout_ms() -> u64 {
    2000
}
fn default_allow_modules() -> Vec<String> {
    vec!["auth".to_string(), "navigation".to_string()]
}
fn default_true() -> bool {
    true
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            superadmin_level: default_superadmin_level(),
            admin_level: default_admin_level(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            store_timeout_ms: default_store_timeout_ms(),
            default_allow_modules: default_allow_modules(),
            treat_unassigned_as_privileged_only: true,
            modules: Vec::new(),
        }
    }
}

impl AccessConfig {
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AuthError::Configuration(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| AuthError::Internal(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| AuthError::Internal(format!("cannot write {}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.admin_level > self.superadmin_level {
            return Err(AuthError::Configuration(format!(
                "admin_level ({}) must not exceed superadmin_level ({})",
                self.admin_level, self.superadmin_level
            )));
        }
        if self.cache_ttl_secs > 0 && self.cache_capacity == 0 {
            return Err(AuthError::Configuration(
                "cache_capacity must be positive when caching is enabled".into(),
            ));
        }
        if self.store_timeout_ms == 0 {
            return Err(AuthError::Configuration(
                "store_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn privilege_policy(&self) -> PrivilegePolicy {
        PrivilegePolicy {
            superadmin_level: self.superadmin_level,
            admin_level: self.admin_level,
        }
    }
}

/// The one place role levels are compared against the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivilegePolicy {
    pub superadmin_level: i32,
    pub admin_level: i32,
}

impl PrivilegePolicy {
    pub fn is_superadmin_level(&self, level: i32) -> bool {
        level >= self.superadmin_level
    }

    pub fn is_superadmin(&self, principal: &Principal) -> bool {
        self.is_superadmin_level(principal.role_level)
    }

    /// Privileged principals bypass row ownership.
    pub fn is_privileged(&self, principal: &Principal) -> bool {
        principal.role_level >= self.admin_level || self.is_superadmin(principal)
    }
}
