use std::sync::Arc;

use adwarden_auth::{
    AccessAdmin, AccessConfig, AccessGuard, AccessStore, AuthError, Authorizer, DataPrivacyFilter,
    ModuleRegistry, PermissionResolver,
};
use serde::{Deserialize, Serialize};

use crate::resources::ResourceStore;

pub struct AppState {
    pub access_store: Arc<dyn AccessStore>,
    pub resolver: Arc<PermissionResolver>,
    pub admin: AccessAdmin,
    pub privacy: DataPrivacyFilter,
    pub resources: Arc<dyn ResourceStore>,
    pub guard: AccessGuard,
}

impl AppState {
    /// Wire the access-control core over the given stores.
    pub fn new(
        access_store: Arc<dyn AccessStore>,
        resources: Arc<dyn ResourceStore>,
        access: &AccessConfig,
        jwt_secret: &str,
    ) -> Result<Self, AuthError> {
        access.validate()?;
        let registry = Arc::new(ModuleRegistry::from_config(&access.modules)?);
        let resolver = Arc::new(PermissionResolver::new(
            access_store.clone(),
            registry,
            access,
        ));
        let authorizer = Arc::new(Authorizer::new(access_store.clone(), resolver.clone()));
        Ok(Self {
            admin: AccessAdmin::new(access_store.clone(), resolver.clone()),
            privacy: DataPrivacyFilter::new(access),
            guard: AccessGuard::new(authorizer, jwt_secret),
            access_store,
            resolver,
            resources,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_addr")]
    pub listen_addr: String,
    /// HMAC secret shared with the authentication service.
    #[serde(default)]
    pub jwt_secret: String,
    /// Request bodies above this size are rejected.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_web_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_web_addr(),
            jwt_secret: String::new(),
            body_limit_bytes: default_body_limit(),
        }
    }
}
