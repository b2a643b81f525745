use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use gatehouse_api::app::{AppServices, build_app};
use gatehouse_api::config::ServerConfig;
use gatehouse_auth::AuthConfig;
use gatehouse_infra::spawn_session_sweeper;

const DEV_SECRET: &str = "gatehouse-insecure-development-secret";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gatehouse_observability::init();

    let auth_config = match std::env::var("GATEHOUSE_JWT_SECRET") {
        Ok(_) => AuthConfig::from_env().context("invalid auth configuration")?,
        Err(_) => {
            tracing::warn!("GATEHOUSE_JWT_SECRET not set; using insecure dev default");
            AuthConfig::from_lookup(|key| match key {
                "GATEHOUSE_JWT_SECRET" => Some(DEV_SECRET.to_string()),
                other => std::env::var(other).ok(),
            })
            .context("invalid auth configuration")?
        }
    };
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;

    let services = AppServices::from_server_config(&server_config, &auth_config)
        .await
        .context("failed to initialize stores")?;
    services
        .bootstrap(&auth_config)
        .await
        .context("failed to seed roles and permissions")?;
    let services = Arc::new(services);

    let sweeper = auth_config
        .session_sweep_interval
        .map(|every| spawn_session_sweeper(services.lifecycle.clone(), every));

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(server_config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", server_config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
