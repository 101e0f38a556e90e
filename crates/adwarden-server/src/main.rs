mod commands;
mod config;

use std::path::PathBuf;

use adwarden_web::ResourceKind;
use clap::{Parser, Subcommand};

use config::AdwardenConfig;

#[derive(Parser)]
#[command(name = "adwarden")]
#[command(about = "Role-based access control and row ownership for the ads reporting API")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (TOML). Defaults apply when omitted.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// HMAC secret for access tokens (overrides web.jwt_secret)
    #[arg(long, global = true, env = "ADWARDEN_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate the schema and serve the API
    Serve,

    /// Create or update the database schema
    Migrate,

    /// Seed default roles, permissions and grants (idempotent)
    Seed,

    /// Verify every protected module has an active permission
    Check,

    /// Assign rows with no owner to a user
    Backfill {
        /// Resource kind (campaigns, campaign_data, cards, reports, brands)
        kind: ResourceKind,
        /// Id of the user receiving the rows
        owner: String,
    },

    /// Create a user with one of the seeded roles
    CreateUser {
        username: String,
        /// Role name, e.g. SuperAdmin
        #[arg(long)]
        role: String,
        #[arg(long)]
        email: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adwarden=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            AdwardenConfig::load(path)?
        }
        None => AdwardenConfig::default(),
    };
    if let Some(secret) = cli.jwt_secret {
        config.web.jwt_secret = secret;
    }

    match cli.command {
        Commands::Serve => commands::serve::run(config).await,
        Commands::Migrate => commands::admin::migrate(&config).await.map(|_| ()),
        Commands::Seed => commands::admin::seed(&config).await,
        Commands::Check => commands::admin::check(&config).await,
        Commands::Backfill { kind, ref owner } => {
            commands::admin::backfill(&config, kind, owner).await
        }
        Commands::CreateUser {
            ref username,
            ref role,
            ref email,
        } => commands::admin::create_user(&config, username, role, email.as_deref()).await,
    }
}
