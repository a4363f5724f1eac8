//! Streaming pipeline: bounded queues, producer tasks, and the HTTP body bridge.

pub mod bridge;
pub mod queue;
pub mod worker;

pub use bridge::{StreamFraming, chunk_body, stream_response};
pub use queue::{ChunkReceiver, ChunkSender, ERROR_PREFIX, StreamClosed, StreamItem, channel};
pub use worker::{NamespaceInit, StreamJob, StreamSource, run_worker, spawn_worker};
