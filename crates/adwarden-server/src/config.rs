use std::path::Path;

use adwarden_auth::AccessConfig;
use adwarden_web::WebConfig;
use serde::{Deserialize, Serialize};

/// Top-level server configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdwardenConfig {
    #[serde(default)]
    pub access: AccessConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding both the access tables and the resource tables.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Postgres URL for the access tables; used only with the `postgres` feature.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_db_path() -> String {
    "adwarden.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            url: None,
        }
    }
}

impl AdwardenConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        config.access.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"").unwrap();
        let config = AdwardenConfig::load(f.path()).unwrap();
        assert_eq!(config.database.path, "adwarden.db");
        assert_eq!(config.access.superadmin_level, 10);
        assert_eq!(config.web.listen_addr, "127.0.0.1:8080");
    }

    #[test]
    fn sections_override_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
[access]
admin_level = 7
cache_ttl_secs = 0
treat_unassigned_as_privileged_only = false

[web]
listen_addr = "0.0.0.0:9000"
jwt_secret = "s3cret"

[database]
path = "/var/lib/adwarden/access.db"
"#
        )
        .unwrap();
        let config = AdwardenConfig::load(f.path()).unwrap();
        assert_eq!(config.access.admin_level, 7);
        assert_eq!(config.access.cache_ttl_secs, 0);
        assert!(!config.access.treat_unassigned_as_privileged_only);
        assert_eq!(config.web.jwt_secret, "s3cret");
        assert_eq!(config.database.path, "/var/lib/adwarden/access.db");
        assert!(config.database.url.is_none());
    }

    #[test]
    fn inconsistent_levels_are_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "[access]\nsuperadmin_level = 5\nadmin_level = 8\n").unwrap();
        assert!(AdwardenConfig::load(f.path()).is_err());
    }
}
