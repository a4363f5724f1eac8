//! TCP server exposing the index engine to authenticated clients.

use super::handler::{Reply, RequestHandler};
use super::protocol::{Request, Response, read_frame, write_frame};
use super::types::{RemoteErrorKind, RpcError};
use crate::auth::{SharedSecret, accept};
use crate::streaming::{ChunkReceiver, StreamItem};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Time a new connection gets to complete the handshake unless overridden.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Listening RPC endpoint.
pub struct RpcServer {
    listener: TcpListener,
    secret: Arc<SharedSecret>,
    handler: Arc<RequestHandler>,
    handshake_timeout: Duration,
}

impl RpcServer {
    /// Bind `address`. Fails when the port is taken.
    pub async fn bind(
        address: &str,
        secret: SharedSecret,
        handler: Arc<RequestHandler>,
    ) -> Result<Self, RpcError> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            secret: Arc::new(secret),
            handler,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Close connections that have not authenticated within `timeout`.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the process exits.
    pub async fn serve(self) -> Result<(), RpcError> {
        self.serve_until(CancellationToken::new()).await
    }

    /// Accept connections until `shutdown` fires, then drop every live connection.
    pub async fn serve_until(self, shutdown: CancellationToken) -> Result<(), RpcError> {
        let address = self.local_addr()?;
        tracing::info!(
            %address,
            secret = %self.secret.fingerprint(),
            "Index server listening"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(%address, "Index server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "Accepted connection");
                        let secret = Arc::clone(&self.secret);
                        let handler = Arc::clone(&self.handler);
                        let shutdown = shutdown.clone();
                        let handshake_timeout = self.handshake_timeout;
                        tokio::spawn(async move {
                            let connection =
                                handle_connection(stream, peer, secret, handler, handshake_timeout);
                            tokio::select! {
                                _ = shutdown.cancelled() => {}
                                result = connection => {
                                    if let Err(err) = result {
                                        tracing::warn!(%peer, error = %err, "Connection error");
                                    }
                                }
                            }
                        });
                    }
                    Err(err) => tracing::error!(error = %err, "Accept error"),
                },
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    secret: Arc<SharedSecret>,
    handler: Arc<RequestHandler>,
    handshake_timeout: Duration,
) -> Result<(), RpcError> {
    stream.set_nodelay(true)?;
    match tokio::time::timeout(handshake_timeout, accept(&mut stream, &secret)).await {
        Ok(Ok(())) => tracing::debug!(%peer, "Client authenticated"),
        Ok(Err(RpcError::AuthenticationMismatch)) => {
            tracing::warn!(%peer, "Rejected connection: authentication failed");
            return Ok(());
        }
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            tracing::warn!(
                %peer,
                timeout_ms = handshake_timeout.as_millis() as u64,
                "Closing connection: handshake not completed in time"
            );
            return Ok(());
        }
    }

    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::debug!(%peer, "Client disconnected");
                return Ok(());
            }
            Err(RpcError::Codec(err)) => {
                tracing::warn!(%peer, error = %err, "Failed to decode request");
                let reply = Response::error(
                    RemoteErrorKind::InvalidRequest,
                    format!("Failed to decode request: {err}"),
                );
                write_frame(&mut stream, &reply).await?;
                continue;
            }
            Err(err) => return Err(err),
        };

        let operation = request.operation();
        tracing::debug!(%peer, operation, "Dispatching request");
        match handler.handle(request).await {
            Reply::Response(response) => write_frame(&mut stream, &response).await?,
            Reply::Stream(receiver) => {
                write_frame(&mut stream, &Response::StreamStarted).await?;
                return forward_stream(stream, peer, receiver).await;
            }
        }
    }
}

/// Relay queue items as frames until the end marker or until the peer hangs up.
async fn forward_stream(
    mut stream: TcpStream,
    peer: SocketAddr,
    mut receiver: ChunkReceiver,
) -> Result<(), RpcError> {
    let (mut reader, mut writer) = stream.split();
    let mut probe = [0u8; 1];

    loop {
        tokio::select! {
            item = receiver.recv() => match item {
                StreamItem::Chunk(text) => {
                    write_frame(&mut writer, &Response::Chunk { text }).await?;
                }
                StreamItem::End => {
                    write_frame(&mut writer, &Response::EndOfStream).await?;
                    tracing::debug!(%peer, "Stream delivered");
                    return Ok(());
                }
            },
            read = reader.read(&mut probe) => {
                if matches!(read, Ok(0) | Err(_)) {
                    tracing::debug!(%peer, "Client closed stream; cancelling worker");
                    return Ok(());
                }
            }
        }
    }
}
