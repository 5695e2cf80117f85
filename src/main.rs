use std::sync::Arc;
use tracing::{error, info};

use dbhands::api::{self, AppState};
use dbhands::backend::Backend;
use dbhands::config::{BackendConfig, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(e) = dotenv {
        info!("No .env file found or failed to load: {}", e);
    }

    // Without credentials there is nothing to talk to.
    let backend_config = match BackendConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Backend configuration is incomplete: {}", e);
            return Err(e.into());
        }
    };
    let server_config = ServerConfig::from_env();

    info!(project_id = %backend_config.project_id, "DbHands starting...");

    let backend = Arc::new(Backend::connect(backend_config, &server_config).await?);
    let app = api::router(AppState { backend });

    info!("Starting HTTP server on {}", server_config.http_addr);
    let listener = tokio::net::TcpListener::bind(server_config.http_addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
