//! Index worker entrypoint.
//!
//! Owns the index engine and serves it to authenticated front-end processes over TCP.
use anyhow::{Context, Result};
use deckindex::{
    auth, config,
    engine::{InMemoryBackend, IndexManager, PlainTextLoader},
    logging,
    rpc::{RequestHandler, RpcServer},
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    config::init_config();
    logging::init_tracing("index-worker");
    let config = config::get_config();

    let secret = auth::derive_secret(
        config.index_server_auth_key.as_deref(),
        &config.index_server_host,
        config.index_server_port,
    );
    let manager = Arc::new(IndexManager::new(
        Arc::new(InMemoryBackend::new()),
        Arc::new(PlainTextLoader),
    ));
    let handler = Arc::new(RequestHandler::new(manager, config.stream_buffer_capacity));

    let address = config.rpc_address();
    let server = RpcServer::bind(&address, secret, handler)
        .await
        .with_context(|| {
            format!(
                "Failed to bind index server on {address}; free the port or change INDEX_SERVER_PORT"
            )
        })?
        .with_handshake_timeout(config.connect_timeout());

    server.serve().await.context("Index server stopped")?;
    Ok(())
}
