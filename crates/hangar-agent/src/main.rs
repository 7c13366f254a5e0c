use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use hangar_runtime::{InstanceManager, JsonFileRegistry, RuntimeConfig, TemplateCatalog};
use tonic::transport::Server;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod console_service;
mod error_payload;
mod health_service;
mod instance_service;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:50061";

/// Stdout logging, plus a daily file under `HANGAR_LOG_DIR` when set. The
/// returned guard must live until exit so buffered lines are flushed.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = std::env::var("HANGAR_LOG_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty());
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "hangar-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

fn listen_addr() -> anyhow::Result<SocketAddr> {
    let raw = std::env::var("HANGAR_LISTEN_ADDR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
    raw.trim()
        .parse()
        .with_context(|| format!("invalid HANGAR_LISTEN_ADDR: {raw}"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config = Arc::new(RuntimeConfig::from_env());
    let addr = listen_addr()?;

    std::fs::create_dir_all(&config.data_root)
        .with_context(|| format!("create data root {}", config.data_root.display()))?;
    let registry = Arc::new(JsonFileRegistry::new(config.registry_dir()));
    let catalog = TemplateCatalog::load(&config.templates_dir).context("load template catalog")?;
    let manager = Arc::new(InstanceManager::new(config.clone(), registry, catalog));

    match manager.runtime().version().await {
        Ok(version) => {
            tracing::info!(runtime = %config.runtime_bin, %version, "container runtime reachable")
        }
        Err(e) => {
            tracing::warn!(runtime = %config.runtime_bin, error = %e, "container runtime not reachable")
        }
    }

    tracing::info!(%addr, data_root = %config.data_root.display(), "hangar-agent gRPC listening");

    Server::builder()
        .add_service(health_service::server(manager.clone()))
        .add_service(instance_service::server(manager.clone()))
        .add_service(console_service::server(manager.console().clone()))
        .serve_with_shutdown(addr, shutdown_signal())
        .await?;

    tracing::info!("shutting down; closing console sessions");
    manager.console().close_all().await;
    Ok(())
}
