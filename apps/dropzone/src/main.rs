//! Dropzone entry point.

mod app;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = app::Args::parse();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting dropzone");

    let config = config::Config::load()?;
    tracing::info!(
        max_files = config.max_files,
        max_file_size_mb = config.max_file_size_mb,
        concurrency = config.max_concurrent_uploads,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, args))
}
