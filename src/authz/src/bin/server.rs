//! # Authorization Gateway
//!
//! Serves request classification and authorization decisions over HTTP.
//!
//! ## Configuration
//!
//! A TOML file passed with `--config`, then environment overrides:
//! - `PORT` - HTTP server port (default: 8080)
//! - `AUTHZ_ENABLE`, `AUTHZ_ADDRESS`, `AUTHZ_APP_CODE`, `AUTHZ_APP_SECRET` - policy engine
//! - `RUST_LOG` - Log filter (default: the configured `log_level`)

use anyhow::Context;
use clap::Parser;
use cmdb_authz::config::Backend;
use cmdb_authz::gateway::{create_router, AppState};
use cmdb_authz::meta::InitConfig;
use cmdb_authz::{
    AuthCenter, Authorize, BusinessScopeCache, Classifier, GatewayConfig, InMemoryAuthCenter,
    ResourceHandler, WarmRefreshPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "authz-gateway", version, about = "CMDB authorization gateway")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "AUTHZ_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port, overriding the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Bootstrap the policy engine model on startup
    #[arg(long)]
    init_model: bool,
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

fn build_state<T: Authorize + 'static>(
    backend: Arc<T>,
    policy: WarmRefreshPolicy,
) -> anyhow::Result<AppState> {
    let classifier = Classifier::new().context("failed to build request classifier")?;
    let cache = BusinessScopeCache::new(backend.clone(), policy);
    Ok(AppState::new(
        Arc::new(classifier),
        backend,
        Arc::new(cache),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatewayConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CMDB Authorization Gateway v{}", cmdb_authz::VERSION);
    info!(
        backend = ?config.backend,
        enforcement = config.auth.enable,
        addresses = config.auth.address.len(),
        warm_refresh_policy = ?config.auth.warm_refresh_policy,
        "configuration loaded"
    );

    let policy = config.auth.warm_refresh_policy;
    let state = match config.backend {
        Backend::Iam => {
            let center = Arc::new(
                AuthCenter::new(config.auth.clone()).context("failed to build policy engine client")?,
            );
            if cli.init_model {
                center
                    .init(&InitConfig::cmdb(&config.auth.system_id))
                    .await
                    .context("failed to initialize policy engine model")?;
            }
            build_state(center, policy)?
        }
        Backend::Memory => {
            warn!("using the in-memory policy engine; decisions are not persisted");
            let engine = if config.auth.enable {
                InMemoryAuthCenter::new()
            } else {
                InMemoryAuthCenter::disabled()
            };
            build_state(Arc::new(engine), policy)?
        }
    };

    let cache = state.cache.clone();
    let app = create_router(state);
    let addr = config.server.bind_address();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting HTTP server on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    cache.shutdown();
    info!("Server shut down gracefully");
    Ok(())
}
