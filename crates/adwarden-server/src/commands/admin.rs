use std::sync::Arc;

use adwarden_auth::PermissionResolver;
use adwarden_web::ResourceKind;
use anyhow::Result;

use super::{Stores, open_stores, registry};
use crate::config::AdwardenConfig;

pub async fn migrate(config: &AdwardenConfig) -> Result<Stores> {
    let stores = open_stores(config).await?;
    stores.access.migrate().await?;
    stores.resources.migrate().await?;
    tracing::info!("Schema up to date");
    Ok(stores)
}

pub async fn seed(config: &AdwardenConfig) -> Result<()> {
    let stores = migrate(config).await?;
    stores.access.seed_defaults(&registry(config)?).await?;
    println!("Default roles and permissions seeded.");
    Ok(())
}

/// Report protected modules that have no active permission. Fails when any
/// are found so deployment scripts can stop on it.
pub async fn check(config: &AdwardenConfig) -> Result<()> {
    let stores = open_stores(config).await?;
    let resolver = PermissionResolver::new(
        stores.access.clone(),
        Arc::new(registry(config)?),
        &config.access,
    );
    let problems = resolver.check_registry().await?;
    if problems.is_empty() {
        println!(
            "OK: {} modules registered, every protected module is enforceable.",
            resolver.registry().modules().len()
        );
        return Ok(());
    }
    for p in &problems {
        println!("  - {p}");
    }
    anyhow::bail!("{} module(s) misconfigured", problems.len())
}

/// Assign legacy rows that have no owner to an existing user.
pub async fn backfill(config: &AdwardenConfig, kind: ResourceKind, owner: &str) -> Result<()> {
    let stores = open_stores(config).await?;
    let user = stores.access.get_user(owner).await?;
    let rows = stores.resources.backfill_unassigned(kind, &user.id).await?;
    if let Err(e) = stores
        .access
        .log_audit(None, "resource.backfill", Some(&format!("{kind}:{}", user.id)))
        .await
    {
        tracing::warn!(error = %e, "audit write failed");
    }
    println!("{rows} {kind} row(s) assigned to {}.", user.username);
    Ok(())
}

pub async fn create_user(
    config: &AdwardenConfig,
    username: &str,
    role: &str,
    email: Option<&str>,
) -> Result<()> {
    let stores = open_stores(config).await?;
    let role = stores.access.get_role_by_name(role).await?;
    let user = stores.access.create_user(username, email, &role.id).await?;
    if let Err(e) = stores
        .access
        .log_audit(None, "user.create", Some(&user.id))
        .await
    {
        tracing::warn!(error = %e, "audit write failed");
    }
    println!("Created user {} ({}) with role {}.", user.username, user.id, role.name);
    Ok(())
}
