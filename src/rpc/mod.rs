//! Authenticated RPC between the front-end and the index worker.

mod client;
mod connection;
mod handler;
pub mod protocol;
mod server;
pub mod types;

pub use client::{IndexApi, IndexClient, connect_with_backoff};
pub use connection::Connection;
pub use handler::{Reply, RequestHandler};
pub use protocol::{MAX_FRAME_SIZE, OPERATIONS, Request, Response};
pub use server::{DEFAULT_HANDSHAKE_TIMEOUT, RpcServer};
pub use types::{ClientSettings, RemoteErrorKind, RpcError};
