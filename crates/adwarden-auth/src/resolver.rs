//! Permission resolution: "may role R perform action A on module M?"
//!
//! # Resolution order
//! 1. Unknown or inactive role: denied. Grant rows are left alone; they just
//!    stop counting.
//! 2. Role level at or above the superadmin threshold: bypass.
//! 3. An active granted permission covering `(module, action)`: granted.
//! 4. A configured default-allow module with no active permission at all:
//!    open.
//! 5. A protected module with no active permission at all: seed-data defect,
//!    reported as [`AuthError::Configuration`].
//! 6. Otherwise denied.
//!
//! Every store read runs under the configured deadline and fails closed with
//! [`AuthError::StorageUnavailable`].

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{GrantCache, Lookup};
use crate::config::{AccessConfig, PrivilegePolicy};
use crate::error::AuthError;
use crate::permissions::{GrantSet, PermissionKey, Requirement};
use crate::registry::{ModuleDef, ModuleRegistry, NavEntry};
use crate::store::AccessStore;
use crate::types::Role;

/// Outcome of a single permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    /// Superadmin level; no grant consulted.
    Bypassed,
    /// Default-allow module without any active permission.
    Open,
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied)
    }
}

/// A role and its effective grants as held in the cache.
#[derive(Debug, Clone)]
pub struct ResolvedRole {
    pub role: Option<Role>,
    pub grants: GrantSet,
}

impl ResolvedRole {
    fn is_usable(&self) -> bool {
        self.role.as_ref().is_some_and(|r| r.is_active)
    }
}

/// Modules that have at least one active permission row.
#[derive(Debug, Clone, Default)]
struct Catalog {
    modules: BTreeSet<String>,
}

const CATALOG_KEY: &str = "catalog";

pub struct PermissionResolver {
    store: Arc<dyn AccessStore>,
    registry: Arc<ModuleRegistry>,
    policy: PrivilegePolicy,
    default_allow: Vec<String>,
    timeout: Duration,
    roles: GrantCache<ResolvedRole>,
    catalog: GrantCache<Catalog>,
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("policy", &self.policy)
            .field("default_allow", &self.default_allow)
            .field("timeout", &self.timeout)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

/// Run a store call under a deadline; a timeout is a storage fault.
pub(crate) async fn with_deadline<T, F>(
    timeout: Duration,
    what: &str,
    fut: F,
) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(operation = %what, timeout_ms = timeout.as_millis() as u64, "access store timed out");
            Err(AuthError::StorageUnavailable(format!(
                "{what} timed out after {}ms",
                timeout.as_millis()
            )))
        }
    }
}

impl PermissionResolver {
    pub fn new(
        store: Arc<dyn AccessStore>,
        registry: Arc<ModuleRegistry>,
        config: &AccessConfig,
    ) -> Self {
        Self {
            store,
            registry,
            policy: config.privilege_policy(),
            default_allow: config
                .default_allow_modules
                .iter()
                .map(|m| m.to_ascii_lowercase())
                .collect(),
            timeout: config.store_timeout(),
            roles: GrantCache::new(config.cache_ttl(), config.cache_capacity),
            catalog: GrantCache::new(config.cache_ttl(), 1),
        }
    }

    pub fn policy(&self) -> PrivilegePolicy {
        self.policy
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Load a role's grant set, from cache when fresh.
    pub async fn resolve_role(&self, role_id: &str) -> Result<Arc<ResolvedRole>, AuthError> {
        let ticket = match self.roles.lookup(role_id) {
            Lookup::Hit(resolved) => return Ok(resolved),
            Lookup::Miss(ticket) => ticket,
        };

        let loaded = with_deadline(
            self.timeout,
            "load role grants",
            self.store.load_role_grants(role_id),
        )
        .await?;

        let resolved = Arc::new(match loaded {
            Some(rg) => ResolvedRole {
                grants: if rg.role.is_active {
                    GrantSet::from_permissions(&rg.permissions)
                } else {
                    GrantSet::new()
                },
                role: Some(rg.role),
            },
            None => {
                tracing::warn!(role_id = %role_id, "permission check for unknown role");
                ResolvedRole {
                    role: None,
                    grants: GrantSet::new(),
                }
            }
        });
        self.roles.fill(ticket, resolved.clone());
        Ok(resolved)
    }

    async fn catalog(&self) -> Result<Arc<Catalog>, AuthError> {
        let ticket = match self.catalog.lookup(CATALOG_KEY) {
            Lookup::Hit(c) => return Ok(c),
            Lookup::Miss(ticket) => ticket,
        };
        let perms = with_deadline(
            self.timeout,
            "list permissions",
            self.store.list_permissions(),
        )
        .await?;
        let modules = perms
            .iter()
            .filter(|p| p.is_active)
            .flat_map(PermissionKey::from_permission)
            .map(|k| k.module)
            .collect();
        let catalog = Arc::new(Catalog { modules });
        self.catalog.fill(ticket, catalog.clone());
        Ok(catalog)
    }

    /// Typed check used by the authorizer.
    pub async fn decide(&self, role_id: &str, req: &Requirement) -> Result<Decision, AuthError> {
        let resolved = self.resolve_role(role_id).await?;
        let Some(role) = resolved.role.as_ref().filter(|r| r.is_active) else {
            return Ok(Decision::Denied);
        };
        if self.policy.is_superadmin_level(role.level) {
            return Ok(Decision::Bypassed);
        }
        if resolved.grants.allows(req) {
            return Ok(Decision::Granted);
        }

        let catalog = self.catalog().await?;
        if catalog.modules.contains(&req.module) {
            return Ok(Decision::Denied);
        }
        if self.default_allow.iter().any(|m| *m == req.module) {
            return Ok(Decision::Open);
        }
        if self.registry.get(&req.module).is_some_and(|m| m.protected) {
            tracing::error!(module = %req.module, "protected module has no active permission; denying");
            return Err(AuthError::Configuration(format!(
                "protected module '{}' has no active permission",
                req.module
            )));
        }
        Ok(Decision::Denied)
    }

    /// `true` when `role_id` may perform `action` on `module`. Malformed input
    /// and store faults are errors, never `false` and never `true`.
    pub async fn has_permission(
        &self,
        role_id: &str,
        module: &str,
        action: &str,
    ) -> Result<bool, AuthError> {
        let req = Requirement::parse(module, action)?;
        Ok(self.decide(role_id, &req).await?.is_allowed())
    }

    /// Every `(module, action)` the role may perform. Empty, not an error, for
    /// a role with no grants.
    pub async fn effective_permissions(
        &self,
        role_id: &str,
    ) -> Result<BTreeSet<Requirement>, AuthError> {
        let resolved = self.resolve_role(role_id).await?;
        let Some(role) = resolved.role.as_ref().filter(|r| r.is_active) else {
            return Ok(BTreeSet::new());
        };
        if self.policy.is_superadmin_level(role.level) {
            return Ok(self.registry.all_requirements());
        }
        Ok(resolved.grants.requirements())
    }

    /// Navigation entries for the role, in registry order.
    pub async fn allowed_modules(&self, role_id: &str) -> Result<Vec<NavEntry>, AuthError> {
        let resolved = self.resolve_role(role_id).await?;
        if !resolved.is_usable() {
            return Ok(Vec::new());
        }
        let everything = resolved
            .role
            .as_ref()
            .is_some_and(|r| self.policy.is_superadmin_level(r.level));
        Ok(self.registry.navigation(&resolved.grants, everything))
    }

    /// Registered modules that have an enforceable surface (at least one
    /// active permission). Modules without one are left out of the admin UI.
    pub async fn enforceable_modules(&self) -> Result<Vec<ModuleDef>, AuthError> {
        let catalog = self.catalog().await?;
        Ok(self
            .registry
            .modules()
            .iter()
            .filter(|m| catalog.modules.contains(&m.name))
            .cloned()
            .collect())
    }

    /// Configuration defects: protected modules with no active permission.
    pub async fn check_registry(&self) -> Result<Vec<AuthError>, AuthError> {
        let catalog = self.catalog().await?;
        let problems: Vec<AuthError> = self
            .registry
            .modules()
            .iter()
            .filter(|m| m.protected && !catalog.modules.contains(&m.name))
            .map(|m| {
                AuthError::Configuration(format!(
                    "protected module '{}' has no active permission",
                    m.name
                ))
            })
            .collect();
        for p in &problems {
            tracing::error!(error = %p, "module registry check failed");
        }
        Ok(problems)
    }

    /// Drop the cached grant set of one role. Must run after the store write
    /// and before the write is acknowledged.
    pub fn invalidate_role(&self, role_id: &str) {
        self.roles.invalidate(role_id);
    }

    /// Drop every cached grant set and the permission catalog.
    pub fn invalidate_all(&self) {
        self.roles.invalidate_all();
        self.catalog.invalidate_all();
    }
}
