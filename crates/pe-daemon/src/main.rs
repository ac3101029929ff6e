// SPDX-License-Identifier: MIT OR Apache-2.0
use anyhow::{Context, Result};
use clap::Parser;
use pe_config::{DEFAULT_CONFIG_PATH, EngineConfig, PlatformKind, load_config, validate_config};
use pe_daemon::{AppState, build_service};
use pe_platform::{MockPlatform, OpenNebulaConnector, PlatformConnector};
use pe_runtime::{RuntimeOrchestrator, Synchronizer};
use pe_store::FileDocumentStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pe-daemon", version, about = "Serverless runtime provision engine")]
struct Args {
    /// Configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address, overrides `host` and `port` from the configuration.
    #[arg(long)]
    bind: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

/// Load the configuration, falling back to defaults when the default file
/// does not exist. An explicitly requested file must exist.
fn resolve_config(explicit: Option<&Path>) -> Result<(EngineConfig, Option<String>)> {
    if let Some(path) = explicit {
        let config =
            load_config(Some(path)).with_context(|| format!("load config {}", path.display()))?;
        return Ok((config, None));
    }
    let default = Path::new(DEFAULT_CONFIG_PATH);
    if default.exists() {
        let config = load_config(Some(default))
            .with_context(|| format!("load config {}", default.display()))?;
        return Ok((config, None));
    }
    let config = load_config(None).context("load default config")?;
    Ok((
        config,
        Some(format!("{DEFAULT_CONFIG_PATH} not found, using defaults")),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, fallback) = resolve_config(args.config.as_deref())?;

    let filter = if args.debug || config.log_level == "debug" {
        EnvFilter::new("pe=debug")
    } else {
        EnvFilter::new(format!("pe={}", config.log_level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(message) = fallback {
        warn!("{message}");
    }
    for warning in validate_config(&config).context("validate config")? {
        warn!(%warning, "configuration warning");
    }

    let connector: Arc<dyn PlatformConnector> = match config.platform {
        PlatformKind::Opennebula => Arc::new(
            OpenNebulaConnector::from_config(&config).context("build OpenNebula client")?,
        ),
        PlatformKind::Mock => Arc::new(MockPlatform::new()),
    };

    let store = FileDocumentStore::open(&config.store_dir)
        .await
        .with_context(|| format!("open document store {}", config.store_dir))?;
    let orchestrator = RuntimeOrchestrator::new(
        Arc::new(store),
        Synchronizer::new(config.sync.clone()),
    );
    let state = Arc::new(AppState {
        orchestrator,
        connector,
    });
    let app = build_service(state);

    let bind = args.bind.unwrap_or_else(|| config.bind_addr());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        bind = %bind,
        platform = ?config.platform,
        oneflow = %config.oneflow_server,
        store = %config.store_dir,
        "pe-daemon listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
