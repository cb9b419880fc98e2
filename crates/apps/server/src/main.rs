use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use engine::{Explorer, ExplorerConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;

/// HTTP surface of the observation explorer.
#[derive(Parser, Debug)]
#[command(name = "explorer-server")]
#[command(about = "Serves observation tiles, merged pages, details and region queries")]
struct Args {
    /// JSON config file; `EXPLORER_*` variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1:9200")]
    addr: SocketAddr,

    /// Persist the detail cache to this file.
    #[arg(long)]
    cache_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = ExplorerConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(path) = args.cache_path {
        config.cache_path = Some(path);
    }
    if let Some(dir) = config.cache_path.as_ref().and_then(|p| p.parent()) {
        if let Err(err) = tokio::fs::create_dir_all(dir).await {
            warn!("failed to create cache dir: {err}");
        }
    }

    let explorer = Arc::new(Explorer::from_config(&config));
    let shutdown = CancellationToken::new();
    let worker = explorer.spawn_workers(shutdown.clone());

    let app = api::router(api::AppState::new(explorer));
    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!("explorer server listening on http://{}", args.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for shutdown signal: {err}");
            }
        })
        .await
        .context("serving")?;

    shutdown.cancel();
    if let Err(err) = worker.await {
        warn!("detail worker ended abnormally: {err}");
    }
    Ok(())
}
