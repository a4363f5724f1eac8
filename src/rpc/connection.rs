//! One authenticated TCP connection to the index worker.

use super::protocol::{Request, Response, read_frame, write_frame};
use super::types::RpcError;
use crate::auth::{SharedSecret, initiate};
use crate::streaming::{ChunkReceiver, ChunkSender, channel};
use std::time::Duration;
use tokio::net::TcpStream;

/// Authenticated connection carrying request/response exchanges.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    /// Dial `address` and run the client side of the handshake within `timeout`.
    ///
    /// A peer that accepts the socket but never completes the handshake yields
    /// [`RpcError::ConnectTimeout`], which the backoff loop treats as a failed attempt.
    pub async fn open(
        address: &str,
        secret: &SharedSecret,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        tracing::debug!(address, "Connecting to index server");
        tokio::time::timeout(timeout, Self::establish(address, secret))
            .await
            .map_err(|_| RpcError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            })?
    }

    async fn establish(address: &str, secret: &SharedSecret) -> Result<Self, RpcError> {
        let mut stream = TcpStream::connect(address).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::ConnectionRefused {
                RpcError::ConnectionRefused(address.to_string())
            } else {
                RpcError::Io(err)
            }
        })?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        initiate(&mut stream, secret).await?;
        tracing::debug!(%peer, "Authenticated with index server");
        Ok(Self { stream })
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &Request) -> Result<Response, RpcError> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream)
            .await?
            .ok_or(RpcError::ConnectionClosed)
    }

    /// Send a streaming request and hand the rest of the connection to a relay task.
    ///
    /// Chunks arrive on the returned receiver. Dropping the receiver closes the connection,
    /// which tells the worker to stop producing.
    pub async fn open_stream(
        mut self,
        request: &Request,
        capacity: usize,
    ) -> Result<ChunkReceiver, RpcError> {
        match self.call(request).await? {
            Response::StreamStarted => {}
            Response::Error { kind, message } => return Err(RpcError::Remote { kind, message }),
            other => {
                return Err(RpcError::Protocol(format!(
                    "expected stream_started, got {other:?}"
                )));
            }
        }

        let (sender, receiver) = channel(capacity);
        tokio::spawn(relay_stream(self.stream, sender));
        Ok(receiver)
    }
}

async fn relay_stream(mut stream: TcpStream, sender: ChunkSender) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = sender.cancelled() => {
                tracing::debug!("Stream consumer went away; closing index server connection");
                return;
            }
            frame = read_frame::<_, Response>(&mut stream) => frame,
        };

        match frame {
            Ok(Some(Response::Chunk { text })) => {
                if sender.send(text).await.is_err() {
                    return;
                }
            }
            Ok(Some(Response::EndOfStream)) => {
                sender.finish().await;
                return;
            }
            Ok(Some(other)) => {
                sender
                    .fail(RpcError::Protocol(format!("unexpected frame in stream: {other:?}")))
                    .await;
                return;
            }
            Ok(None) => {
                tracing::warn!("Index server closed the connection mid-stream");
                sender.fail(RpcError::ConnectionClosed).await;
                return;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Stream connection to index server failed");
                sender.fail(err).await;
                return;
            }
        }
    }
}
