//! Error and setting types shared by the RPC client and server.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the index worker.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The worker actively refused the TCP connection.
    #[error("Connection refused by index server at {0}")]
    ConnectionRefused(String),
    /// Every connection attempt failed.
    #[error("Could not connect to index server after {attempts} attempts: {last_error}")]
    ConnectionFailure {
        /// Attempts made before giving up.
        attempts: u32,
        /// Rendering of the last observed failure.
        last_error: String,
    },
    /// Dialling or authenticating did not finish within the connect timeout.
    #[error("Timed out after {timeout:?} connecting to index server at {address}")]
    ConnectTimeout {
        /// Address being dialled.
        address: String,
        /// Budget that expired.
        timeout: Duration,
    },
    /// The peer could not prove possession of the shared secret.
    #[error("Index server authentication failed; check INDEX_SERVER_AUTH_KEY on both processes")]
    AuthenticationMismatch,
    /// Socket-level failure.
    #[error("I/O error on index server connection: {0}")]
    Io(#[from] std::io::Error),
    /// A frame did not contain the expected JSON message.
    #[error("Malformed RPC frame: {0}")]
    Codec(#[from] serde_json::Error),
    /// A frame exceeded [`MAX_FRAME_SIZE`](crate::rpc::protocol::MAX_FRAME_SIZE).
    #[error("RPC frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),
    /// The peer sent a well-formed but unexpected message.
    #[error("Index server protocol violation: {0}")]
    Protocol(String),
    /// The peer closed the connection mid-exchange.
    #[error("Index server closed the connection")]
    ConnectionClosed,
    /// The worker executed the operation and reported a failure.
    #[error("Index server reported {kind:?}: {message}")]
    Remote {
        /// Failure category reported by the worker.
        kind: RemoteErrorKind,
        /// Human-readable description from the worker.
        message: String,
    },
    /// The call failed again after one reconnect.
    #[error("Remote call {operation} failed after reconnecting: {source}")]
    RemoteCallFailure {
        /// Operation that failed.
        operation: &'static str,
        /// Failure observed on the retry.
        #[source]
        source: Box<RpcError>,
    },
}

impl RpcError {
    /// Whether the failure points at a broken connection, which a reconnect may repair.
    ///
    /// Authentication mismatches and errors reported by the worker itself are logical
    /// failures and never trigger a reconnect.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRefused(_)
                | Self::ConnectionFailure { .. }
                | Self::ConnectTimeout { .. }
                | Self::Io(_)
                | Self::Codec(_)
                | Self::FrameTooLarge(_)
                | Self::Protocol(_)
                | Self::ConnectionClosed
        )
    }
}

/// Failure categories carried in `error` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// Arguments were rejected before touching the index.
    InvalidRequest,
    /// No namespace has been initialized yet.
    NotInitialized,
    /// The document could not be read.
    DocumentLoad,
    /// The index backend failed.
    Backend,
}

/// Connection parameters for [`IndexClient`](crate::rpc::IndexClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// `host:port` of the index worker.
    pub address: String,
    /// Total connection attempts per connect sequence.
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubled after each further failure.
    pub retry_interval: Duration,
    /// Budget for one attempt: TCP connect plus handshake.
    pub connect_timeout: Duration,
    /// Capacity of the local queue backing each stream.
    pub stream_buffer: usize,
}
