pub mod admin;
pub mod serve;

use std::sync::Arc;

use adwarden_auth::{AccessStore, ModuleRegistry, SqliteAccessStore};
use adwarden_web::{ResourceStore, SqliteResourceStore};

use crate::config::AdwardenConfig;

pub struct Stores {
    pub access: Arc<dyn AccessStore>,
    pub resources: Arc<dyn ResourceStore>,
}

/// Open the access and resource stores named by `[database]`.
pub async fn open_stores(config: &AdwardenConfig) -> anyhow::Result<Stores> {
    let resources: Arc<dyn ResourceStore> =
        Arc::new(SqliteResourceStore::open(&config.database.path)?);
    Ok(Stores {
        access: open_access_store(config).await?,
        resources,
    })
}

#[cfg(feature = "postgres")]
async fn open_access_store(config: &AdwardenConfig) -> anyhow::Result<Arc<dyn AccessStore>> {
    if let Some(url) = &config.database.url {
        tracing::info!("Using PostgreSQL for access tables");
        return Ok(Arc::new(adwarden_auth::PostgresAccessStore::new(url).await?));
    }
    Ok(Arc::new(SqliteAccessStore::open(&config.database.path)?))
}

#[cfg(not(feature = "postgres"))]
async fn open_access_store(config: &AdwardenConfig) -> anyhow::Result<Arc<dyn AccessStore>> {
    if config.database.url.is_some() {
        tracing::warn!("database.url ignored; built without the postgres feature");
    }
    Ok(Arc::new(SqliteAccessStore::open(&config.database.path)?))
}

pub fn registry(config: &AdwardenConfig) -> anyhow::Result<ModuleRegistry> {
    Ok(ModuleRegistry::from_config(&config.access.modules)?)
}
