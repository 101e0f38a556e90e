use std::sync::Arc;

use adwarden_web::AppState;
use anyhow::Result;

use super::admin;
use crate::config::AdwardenConfig;

pub async fn run(config: AdwardenConfig) -> Result<()> {
    let stores = admin::migrate(&config).await?;
    let state = AppState::new(
        stores.access,
        stores.resources,
        &config.access,
        &config.web.jwt_secret,
    )?;

    // Misconfigured modules stay closed; serve anyway and say so.
    let problems = state.resolver.check_registry().await?;
    if !problems.is_empty() {
        tracing::error!(
            count = problems.len(),
            "protected modules without permissions; run `adwarden seed`"
        );
    }

    adwarden_web::start_web_server(config.web, Arc::new(state)).await
}
