//! dlbridge-server - qBittorrent-compatible download bridge

use anyhow::{Context, Result};
use clap::Parser;
use dlbridge_core::{MemoryRegistry, SharedSettings};
use dlbridge_server::config::{spawn_reload, ServerConfig, RELOAD_INTERVAL};
use dlbridge_server::{auth_provider, serve, AppState};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "dlbridge-server")]
#[command(author, version, about = "qBittorrent-compatible Web API backed by the dlbridge engine")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "DLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overrides the config file
    #[arg(long, env = "DLBRIDGE_BIND")]
    bind: Option<IpAddr>,

    /// Port to listen on, overrides the config file
    #[arg(short, long, env = "DLBRIDGE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(ServerConfig::default_path);
    let config = ServerConfig::load_or_default(&config_path)
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;

    let bind: IpAddr = match args.bind {
        Some(bind) => bind,
        None => config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {}", config.server.bind))?,
    };
    let addr = SocketAddr::new(bind, args.port.unwrap_or(config.server.port));

    tokio::fs::create_dir_all(&config.settings.download_path)
        .await
        .with_context(|| {
            format!(
                "creating download directory {}",
                config.settings.download_path.display()
            )
        })?;

    let settings = SharedSettings::new(config.settings.clone());
    let reload = spawn_reload(config_path, settings.clone(), RELOAD_INTERVAL);

    let registry = Arc::new(MemoryRegistry::new(Arc::new(settings)));
    let state = AppState::new(registry, auth_provider(&config));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    };
    serve(addr, state, shutdown).await?;

    reload.abort();
    Ok(())
}
