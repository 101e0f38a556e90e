use std::collections::HashMap;

use crate::error::AuthError;
use crate::permissions::PermissionKey;
use crate::registry::ModuleRegistry;
use crate::store::AccessStore;

const CONTENT_MODULES: &[&str] = &["campaigns", "campaign_data", "cards", "reports", "brands"];

/// Default roles: `(name, level, description)`. SuperAdmin needs no grants.
const ROLES: &[(&str, i32, &str)] = &[
    ("SuperAdmin", 10, "Bypasses every permission and ownership check"),
    ("Admin", 8, "Manages every module and sees all rows"),
    ("Editor", 3, "Creates and edits own campaigns, cards and reports"),
    ("Advertiser", 2, "Manages own campaigns and reads own reports"),
    ("Viewer", 1, "Read-only access to own reports"),
];

fn role_grants(role: &str) -> Vec<String> {
    match role {
        "Admin" => Vec::new(), // every module wildcard, filled in below
        "Editor" => {
            let mut names = vec!["dashboard_read".to_string(), "reports_export".to_string()];
            for m in CONTENT_MODULES {
                for a in ["read", "create", "update"] {
                    names.push(format!("{m}_{a}"));
                }
            }
            names
        }
        "Advertiser" => vec![
            "dashboard_read".into(),
            "campaigns_read".into(),
            "campaigns_create".into(),
            "campaigns_update".into(),
            "reports_read".into(),
        ],
        "Viewer" => vec!["dashboard_read".into(), "reports_read".into()],
        _ => Vec::new(),
    }
}

/// Seed one permission per `(module, action)` of every protected module, a
/// `{module}_*` wildcard per such module, and the default roles with their
/// grants. Unprotected modules get no rows so default-allow keeps them open.
///
/// Re-running only adds what is missing. Default grants are written when a
/// role is first created; an existing role's grants belong to the
/// administrators and are left as they are.
pub async fn seed_defaults(
    store: &dyn AccessStore,
    registry: &ModuleRegistry,
) -> Result<(), AuthError> {
    let mut perm_map = HashMap::new();
    for module in registry.modules().iter().filter(|m| m.protected) {
        for action in &module.actions {
            let key = PermissionKey::exact(&module.name, *action);
            let desc = format!("{} {}", module.label, action);
            let p = store
                .create_permission(&module.name, action.as_str(), &desc)
                .await?;
            perm_map.insert(key.name(), p.id);
        }
        let wildcard = PermissionKey::any(&module.name);
        let p = store
            .create_permission(&module.name, "*", &format!("All {} actions", module.label))
            .await?;
        perm_map.insert(wildcard.name(), p.id);
    }

    for (name, level, desc) in ROLES {
        let role = match store.get_role_by_name(name).await {
            Ok(_) => {
                tracing::debug!(role = %name, "role exists; grants left as they are");
                continue;
            }
            Err(AuthError::NotFound(_)) => store.create_role(name, *level, desc).await?,
            Err(e) => return Err(e),
        };

        let names = if *name == "Admin" {
            registry
                .modules()
                .iter()
                .map(|m| PermissionKey::any(&m.name).name())
                .collect()
        } else {
            role_grants(name)
        };

        for perm_name in names {
            match perm_map.get(&perm_name) {
                Some(pid) => {
                    store.grant_permission(&role.id, pid, None).await?;
                }
                None => {
                    tracing::debug!(role = %name, permission = %perm_name, "seed grant skipped; module not registered");
                }
            }
        }
    }

    tracing::info!(
        permissions = perm_map.len(),
        roles = ROLES.len(),
        "access defaults seeded"
    );
    Ok(())
}
