#![warn(missing_docs)]

//! Core library for the Deck Index worker and its HTTP front-end.

/// HTTP routing and REST handlers for the front-end process.
pub mod api;
/// Shared-secret derivation and the connection handshake.
pub mod auth;
/// Environment-driven configuration management.
pub mod config;
/// Client for the document conversion service.
pub mod conversion;
/// Index engine owner and its collaborator interfaces.
pub mod engine;
/// Structured logging and tracing setup.
pub mod logging;
/// Streaming counters exposed by the front-end.
pub mod metrics;
/// Bounded exponential retry helpers.
pub mod retry;
/// Framed RPC protocol, server, and client stub.
pub mod rpc;
/// Stream queue, worker tasks, and the HTTP body bridge.
pub mod streaming;
