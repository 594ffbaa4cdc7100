//! Silo server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use silo_core::config::AppConfig;
use silo_server::{Runtime, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Silo - a content-addressed file store with deduplication
#[derive(Parser, Debug)]
#[command(name = "silo-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SILO_CONFIG", default_value = "config/server.toml")]
    config: String,

    /// Override the listen address from the configuration
    #[arg(long)]
    bind: Option<String>,
}

fn load_config(args: &Args) -> Result<AppConfig> {
    // The file is optional; SILO_ variables can provide or override everything.
    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and environment"
        );
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("SILO_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,silo_server=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Silo v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;

    silo_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = silo_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob store")?;
    storage
        .health_check()
        .await
        .context("blob store health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Blob store ready");

    let catalog = silo_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize catalog")?;
    tracing::info!(backend = catalog.backend_name(), "Catalog ready");

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    let runtime = Runtime::start(config, storage, catalog).await;
    let app = create_router(runtime.state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    runtime.shutdown().await;
    Ok(())
}
