use anyhow::Result;
use bloompoint::environment::EnvironmentConfig;
use bloompoint::start_web_server;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

#[tokio::main]
async fn main() -> Result<()> {
    Registry::default()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or(EnvFilter::new("bloompoint=info,rocket::server=off")),
        )
        .init();

    let port = std::env::var("BLOOMPOINT_PORT")
        .map_err(|_| anyhow::anyhow!("BLOOMPOINT_PORT environment variable not set"))?
        .parse::<u16>()
        .map_err(|_| anyhow::anyhow!("BLOOMPOINT_PORT must be a valid port number"))?;

    let config = EnvironmentConfig::load()?;
    config.ensure_directories().await?;

    info!("Starting BloomPoint XP API server");
    info!(
        "Environment: {}",
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| "local".to_string())
    );
    info!("Database: {}", config.database_path.display());
    info!("Identity provider: {}", config.identity_provider.issuer);
    info!("Server: http://0.0.0.0:{}", port);

    start_web_server(config.database_path, config.identity_provider, port).await
}
