use account_manager::api::{create_router, ApiState};
use account_manager::manager::AccountManager;
use anyhow::{Context, Result};
use fleettrack::config::{encryption_key_from_env, load_config};
use fleettrack::logging;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path =
        std::env::var("FLEETTRACK_CONFIG").unwrap_or_else(|_| "fleettrack.toml".to_string());
    let mut config = load_config(&config_path)?;
    config.apply_env_overrides();

    let _log_guard = logging::init(
        &config.logging,
        "account-manager",
        "account_manager=info,fleettrack=info",
    )?;

    info!("Account Manager starting...");

    let encryption_key = encryption_key_from_env()?;

    info!(
        config_path = %config_path,
        database = %config.storage.database_path,
        poll_interval_secs = config.polling.interval_seconds,
        api_enabled = config.server.enabled,
        log_directory = %config.logging.directory,
        "Configuration loaded"
    );

    let manager = AccountManager::start(&config, &encryption_key).await?;

    let server_handle = if config.server.enabled {
        let router = create_router(ApiState {
            registry: manager.registry(),
            request_delay: Duration::from_millis(config.polling.inter_request_delay_ms),
        });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
            .await
            .context("Failed to bind account API port")?;
        info!(port = config.server.port, "Account API listening");

        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Account API server error");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    if let Some(handle) = server_handle {
        handle.abort();
    }
    manager.shutdown().await;
    info!("Account manager stopped");

    Ok(())
}
