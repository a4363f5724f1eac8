//! Adapts a [`ChunkReceiver`] into a streaming HTTP response body.

use super::queue::ChunkReceiver;
use crate::metrics::StreamMetrics;
use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_core::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

/// How chunks are written into the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFraming {
    /// Chunks are concatenated unchanged.
    #[default]
    Raw,
    /// Each chunk becomes one server-sent event.
    EventStream,
}

impl StreamFraming {
    /// Encode one chunk for the wire.
    pub fn encode(self, chunk: &str) -> Bytes {
        match self {
            Self::Raw => Bytes::from(chunk.to_owned()),
            Self::EventStream => {
                let mut event = String::with_capacity(chunk.len() + 8);
                for line in chunk.split('\n') {
                    event.push_str("data: ");
                    event.push_str(line);
                    event.push('\n');
                }
                event.push('\n');
                Bytes::from(event)
            }
        }
    }
}

struct StreamGuard {
    metrics: Arc<StreamMetrics>,
    completed: bool,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.completed {
            self.metrics.record_completed();
        } else {
            tracing::debug!("HTTP client left before the end of the stream");
            self.metrics.record_aborted();
        }
    }
}

/// Body stream yielding every chunk as soon as it is dequeued and ending at the end marker.
///
/// Dropping the stream drops the receiver, which cancels the producer.
pub fn chunk_body(
    mut receiver: ChunkReceiver,
    framing: StreamFraming,
    metrics: Arc<StreamMetrics>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut guard = StreamGuard { metrics: metrics.clone(), completed: false };
        while let Some(chunk) = receiver.next_chunk().await {
            metrics.record_chunk();
            yield Ok(framing.encode(&chunk));
        }
        guard.completed = true;
    }
}

/// Streaming response with event-stream headers and buffering disabled.
pub fn stream_response(
    receiver: ChunkReceiver,
    framing: StreamFraming,
    metrics: Arc<StreamMetrics>,
) -> Response {
    metrics.record_open();
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(chunk_body(receiver, framing, metrics)),
    )
        .into_response()
}
