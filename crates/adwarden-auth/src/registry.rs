//! Declarative module registry: module → actions → routes.
//!
//! The route guard, the navigation builder and the permission seeder all read
//! from this one table, so a route cannot be reachable without a declared
//! requirement and the navigation cannot drift from what the guard enforces.

use std::collections::{BTreeSet, HashMap};

use http::Method;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::permissions::{Action, GrantSet, Requirement, normalize_module};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBinding {
    pub action: Action,
    /// HTTP method, upper case.
    pub method: String,
    /// Route template as registered with the router, e.g. `/api/reports/{id}`.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub order: u32,
    /// A protected module must have at least one active permission seeded.
    #[serde(default = "default_protected")]
    pub protected: bool,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub routes: Vec<RouteBinding>,
}

fn default_protected() -> bool {
    true
}

impl ModuleDef {
    /// Path of the module's landing page: its first `GET` read route.
    pub fn landing_path(&self) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.action == Action::Read && r.method == "GET" && !r.path.contains('{'))
            .map(|r| r.path.as_str())
    }
}

/// One entry of the navigation list returned to the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavEntry {
    pub module: String,
    pub label: String,
    pub order: u32,
    pub path: Option<String>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDef>,
    routes: HashMap<(Method, String), Requirement>,
}

impl ModuleRegistry {
    pub fn new(defs: Vec<ModuleDef>) -> Result<Self, AuthError> {
        let mut modules = Vec::with_capacity(defs.len());
        let mut names = BTreeSet::new();
        let mut routes = HashMap::new();

        for mut def in defs {
            def.name = normalize_module(&def.name)
                .map_err(|e| AuthError::Configuration(format!("module registry: {e}")))?;
            if !names.insert(def.name.clone()) {
                return Err(AuthError::Configuration(format!(
                    "module '{}' is declared twice",
                    def.name
                )));
            }
            for route in &mut def.routes {
                if !def.actions.contains(&route.action) {
                    return Err(AuthError::Configuration(format!(
                        "route {} {} binds action '{}' not declared by module '{}'",
                        route.method, route.path, route.action, def.name
                    )));
                }
                route.method = route.method.to_ascii_uppercase();
                let method = Method::from_bytes(route.method.as_bytes()).map_err(|_| {
                    AuthError::Configuration(format!("invalid HTTP method '{}'", route.method))
                })?;
                let req = Requirement {
                    module: def.name.clone(),
                    action: route.action,
                };
                if let Some(existing) = routes.insert((method, route.path.clone()), req) {
                    return Err(AuthError::Configuration(format!(
                        "route {} {} is bound to both {existing} and {}.{}",
                        route.method, route.path, def.name, route.action
                    )));
                }
            }
            modules.push(def);
        }
        modules.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

        Ok(Self { modules, routes })
    }

    /// Use `overrides` when given, the built-in table otherwise.
    pub fn from_config(overrides: &[ModuleDef]) -> Result<Self, AuthError> {
        if overrides.is_empty() {
            Self::builtin()
        } else {
            Self::new(overrides.to_vec())
        }
    }

    /// Modules of the ads-reporting application.
    pub fn builtin() -> Result<Self, AuthError> {
        let mut defs = vec![ModuleDef {
            name: "dashboard".into(),
            label: "Dashboard".into(),
            order: 0,
            protected: true,
            actions: vec![Action::Read],
            routes: vec![route(Action::Read, "GET", "/api/dashboard")],
        }];
        defs.push(owned_module("campaigns", "Campaigns", 10, false));
        defs.push(owned_module("campaign_data", "Campaign Data", 20, true));
        defs.push(owned_module("cards", "Cards", 30, false));
        defs.push(owned_module("reports", "Reports", 40, true));
        defs.push(owned_module("brands", "Brands", 50, false));
        defs.push(ModuleDef {
            name: "users".into(),
            label: "Users".into(),
            order: 90,
            protected: true,
            actions: vec![Action::Read, Action::Create, Action::Update],
            routes: vec![
                route(Action::Read, "GET", "/api/admin/users"),
                route(Action::Read, "GET", "/api/admin/users/{id}"),
                route(Action::Create, "POST", "/api/admin/users"),
                route(Action::Update, "PUT", "/api/admin/users/{id}"),
            ],
        });
        defs.push(ModuleDef {
            name: "roles".into(),
            label: "Roles & Permissions".into(),
            order: 91,
            protected: true,
            actions: vec![Action::Read, Action::Create, Action::Update, Action::Delete],
            routes: vec![
                route(Action::Read, "GET", "/api/admin/roles"),
                route(Action::Read, "GET", "/api/admin/roles/{id}"),
                route(Action::Create, "POST", "/api/admin/roles"),
                route(Action::Update, "PUT", "/api/admin/roles/{id}"),
                route(Action::Delete, "DELETE", "/api/admin/roles/{id}"),
                route(Action::Read, "GET", "/api/admin/roles/{id}/permissions"),
                route(Action::Update, "POST", "/api/admin/roles/{id}/permissions"),
                route(
                    Action::Update,
                    "DELETE",
                    "/api/admin/roles/{id}/permissions/{permission_id}",
                ),
                route(Action::Read, "GET", "/api/admin/modules"),
            ],
        });
        defs.push(ModuleDef {
            name: "permissions".into(),
            label: "Permission Catalog".into(),
            order: 92,
            protected: true,
            actions: vec![Action::Read, Action::Create, Action::Update],
            routes: vec![
                route(Action::Read, "GET", "/api/admin/permissions"),
                route(Action::Create, "POST", "/api/admin/permissions"),
                route(Action::Update, "PUT", "/api/admin/permissions/{id}"),
            ],
        });
        defs.push(ModuleDef {
            name: "audit".into(),
            label: "Audit Log".into(),
            order: 93,
            protected: true,
            actions: vec![Action::Read],
            routes: vec![route(Action::Read, "GET", "/api/admin/audit")],
        });
        defs.push(ModuleDef {
            name: "navigation".into(),
            label: "Navigation".into(),
            order: 100,
            protected: false,
            actions: vec![Action::Read],
            routes: vec![route(Action::Read, "GET", "/api/navigation")],
        });
        Self::new(defs)
    }

    pub fn modules(&self) -> &[ModuleDef] {
        &self.modules
    }

    pub fn get(&self, name: &str) -> Option<&ModuleDef> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Requirement declared for a matched route template.
    pub fn requirement_for(&self, method: &Method, path: &str) -> Option<&Requirement> {
        self.routes.get(&(method.clone(), path.to_string()))
    }

    /// Every `(module, action)` pair the registry declares.
    pub fn all_requirements(&self) -> BTreeSet<Requirement> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.actions.iter().map(|a| Requirement {
                    module: m.name.clone(),
                    action: *a,
                })
            })
            .collect()
    }

    /// Navigation for a role. `everything` is set for superadmins, who see
    /// every registered module with every declared action.
    pub fn navigation(&self, grants: &GrantSet, everything: bool) -> Vec<NavEntry> {
        self.modules
            .iter()
            .filter_map(|m| {
                let actions: Vec<Action> = m
                    .actions
                    .iter()
                    .copied()
                    .filter(|a| {
                        everything
                            || grants.allows(&Requirement {
                                module: m.name.clone(),
                                action: *a,
                            })
                    })
                    .collect();
                if actions.is_empty() {
                    return None;
                }
                Some(NavEntry {
                    module: m.name.clone(),
                    label: m.label.clone(),
                    order: m.order,
                    path: m.landing_path().map(str::to_string),
                    actions,
                })
            })
            .collect()
    }
}

fn route(action: Action, method: &str, path: &str) -> RouteBinding {
    RouteBinding {
        action,
        method: method.to_string(),
        path: path.to_string(),
    }
}

fn owned_module(name: &str, label: &str, order: u32, exportable: bool) -> ModuleDef {
    let base = format!("/api/{name}");
    let item = format!("/api/{name}/{{id}}");
    let mut actions = vec![Action::Read, Action::Create, Action::Update, Action::Delete];
    let mut routes = vec![
        route(Action::Read, "GET", &base),
        route(Action::Read, "GET", &item),
        route(Action::Create, "POST", &base),
        route(Action::Update, "PUT", &item),
        route(Action::Delete, "DELETE", &item),
    ];
    if exportable {
        actions.push(Action::Export);
        routes.push(route(Action::Export, "GET", &format!("/api/{name}/export")));
    }
    ModuleDef {
        name: name.to_string(),
        label: label.to_string(),
        order,
        protected: true,
        actions,
        routes,
    }
}
