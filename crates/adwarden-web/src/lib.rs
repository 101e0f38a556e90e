mod models;
pub mod resources;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

pub use resources::{ResourceKind, ResourceStore, SqliteResourceStore};
pub use routes::build_router;
pub use state::{AppState, WebConfig};

/// Serve the API until the listener fails.
pub async fn start_web_server(config: WebConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    if config.jwt_secret.is_empty() {
        anyhow::bail!("web.jwt_secret is not set");
    }
    let app = build_router(state, config.body_limit_bytes);

    let addr: SocketAddr = config.listen_addr.parse()?;
    tracing::info!("Starting API on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
