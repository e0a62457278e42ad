use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use depositdesk::config::Config;
use depositdesk::db::{self, queries, AppState};

#[derive(Parser)]
#[command(name = "depositdesk", version, about = "Deposit payments plugin backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create a long-lived license for an organization
    CreateLicense {
        /// Organization id the license belongs to
        #[arg(long)]
        organization: String,
        /// Number of simultaneous domain activations
        #[arg(long, default_value_t = 1)]
        max_domains: i32,
        /// Validity in days from now
        #[arg(long, default_value_t = 36500)]
        expires_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = db::init_db(&config.database_path).context("failed to open database")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pool, config).await,
        Command::CreateLicense {
            organization,
            max_domains,
            expires_days,
        } => create_license(pool, &organization, max_domains, expires_days),
    }
}

async fn serve(pool: db::DbPool, config: Config) -> anyhow::Result<()> {
    let addr = config.addr();
    if config.plugin_secret_key.is_empty() {
        tracing::warn!("PLUGIN_SECRET_KEY is not set; plugin endpoints will reject all requests");
    }
    if config.dev_mode {
        tracing::info!("Running in dev mode");
    }

    let state = AppState::new(pool, config);
    let app = depositdesk::app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("server error")
}

fn create_license(
    pool: db::DbPool,
    organization_id: &str,
    max_domains: i32,
    expires_days: i64,
) -> anyhow::Result<()> {
    let conn = pool.get()?;

    let organization = queries::get_organization_by_id(&conn, organization_id)?
        .with_context(|| format!("organization {} not found", organization_id))?;

    let expires_at = chrono::Utc::now().timestamp() + expires_days * 86400;
    let license = queries::create_license(
        &conn,
        &queries::CreateLicense {
            organization_id: &organization.id,
            max_domains,
            expires_at,
            subscription_id: None,
        },
    )?;

    println!("Created license for {}", organization.name);
    println!("  key:         {}", license.license_key);
    println!("  max domains: {}", license.max_domains);
    println!("  expires at:  {}", license.expires_at);
    Ok(())
}
