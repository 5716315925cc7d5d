use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cad_server::config::ServerConfig;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serves text-to-STL generation over HTTP.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML config file; falls back to `CAD_CONFIG`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var_os("CAD_CONFIG").map(PathBuf::from));
    let mut config = ServerConfig::load(config_path.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;

    let pipeline = cad_server::build_pipeline(&config)?;
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(address = %config.bind, "listening");
    axum::serve(listener, cad_server::app(Arc::new(pipeline))).await?;
    Ok(())
}
