use anyhow::Result;
use auth_throttle::config::Config;
use auth_throttle::config_validator::ConfigValidator;
use auth_throttle::registry::{start_sweep_task, PolicyRegistry};
use auth_throttle::server::Server;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("auth_throttle={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ConfigValidator::validate(&config)
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!("Starting auth-throttle");
    tracing::info!(
        "Configuration: bind_addr={}, frontend_url={}, trust_proxy_hops={}, admin={}",
        config.bind_addr,
        config.frontend_url,
        config.trust_proxy_hops,
        config.enable_admin
    );

    let overrides = config
        .policy_overrides()
        .map_err(|e| anyhow::anyhow!("Failed to load policy overrides: {}", e))?;
    let registry = Arc::new(
        PolicyRegistry::with_overrides(&config.frontend_url, &overrides)
            .map_err(|e| anyhow::anyhow!("Failed to build rate limit policies: {}", e))?,
    );

    let _sweeper = start_sweep_task(registry.clone(), config.sweep_interval);

    let server = Server::new(&config, registry)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
