//! HTTP front-end entrypoint.
//!
//! Connects to the index worker (optionally launching it first) and serves the document API.
use anyhow::{Context, Result};
use clap::Parser;
use deckindex::{
    api, auth, config, conversion::ConversionClient, logging, retry::RetryPolicy, rpc::IndexClient,
};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::process::{Child, Command};

#[derive(Debug, Parser)]
#[command(name = "deckindex", about = "Document index front-end")]
struct Cli {
    /// Launch the index worker as a child process before connecting to it.
    #[arg(long)]
    spawn_worker: bool,
    /// Worker executable used with `--spawn-worker`.
    #[arg(long, default_value = "deckindex-worker")]
    worker_bin: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing("front-end");
    let config = config::get_config();

    // Held until exit; dropping it kills the worker.
    let _worker = if cli.spawn_worker {
        Some(spawn_worker(&cli.worker_bin)?)
    } else {
        None
    };

    let secret = auth::derive_secret(
        config.index_server_auth_key.as_deref(),
        &config.index_server_host,
        config.index_server_port,
    );
    let client = IndexClient::bootstrap(config.client_settings(), secret)
        .await
        .context("Failed to connect to the index server")?;

    let mut state = api::AppState::new(Arc::new(client), config.upload_settings())
        .with_framing(config.stream_framing);
    match config.unoserver_url.as_deref() {
        Some(url) => {
            let converter = ConversionClient::new(url, RetryPolicy::new(5, Duration::from_secs(2)))
                .context("Failed to build conversion client")?;
            state = state.with_converter(converter);
        }
        None => tracing::info!("UNOSERVER_URL not set; PDF previews disabled"),
    }
    let app = api::create_router(state);

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.server_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.server_port))?;
    tracing::info!("Listening on http://0.0.0.0:{}", config.server_port);
    axum::serve(listener, app).await.context("HTTP server error")?;
    Ok(())
}

fn spawn_worker(bin: &Path) -> Result<Child> {
    let child = Command::new(bin)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start index worker {}", bin.display()))?;
    tracing::info!(pid = child.id(), worker = %bin.display(), "Spawned index worker");
    Ok(child)
}
