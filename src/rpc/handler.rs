//! Dispatch of decoded requests onto the index engine.

use super::protocol::{Request, Response};
use super::types::RemoteErrorKind;
use crate::engine::{EngineError, IndexManager};
use crate::streaming::ChunkReceiver;
use std::path::Path;
use std::sync::Arc;

/// What the server sends back for one request.
#[derive(Debug)]
pub enum Reply {
    /// A single response frame.
    Response(Response),
    /// A stream of chunks relayed until its end marker.
    Stream(ChunkReceiver),
}

/// Routes each [`Request`] variant to the matching [`IndexManager`] operation.
pub struct RequestHandler {
    manager: Arc<IndexManager>,
    stream_buffer: usize,
}

impl RequestHandler {
    /// Create a handler over `manager`; streams buffer up to `stream_buffer` chunks.
    pub fn new(manager: Arc<IndexManager>, stream_buffer: usize) -> Self {
        Self {
            manager,
            stream_buffer,
        }
    }

    /// Execute one request.
    pub async fn handle(&self, request: Request) -> Reply {
        let result = match request {
            Request::InitializeIndex { namespace } => self
                .manager
                .initialize_index(&namespace)
                .await
                .map(|()| Response::Done),
            Request::InsertIntoIndex { filepath, doc_id } => {
                if filepath.is_empty() {
                    return Reply::Response(Response::error(
                        RemoteErrorKind::InvalidRequest,
                        "filepath must not be empty",
                    ));
                }
                self.manager
                    .insert_into_index(Path::new(&filepath), doc_id)
                    .await
                    .map(|_| Response::Done)
            }
            Request::QueryIndex { query_text, doc_id } => self
                .manager
                .query_index(&query_text, &doc_id)
                .await
                .map(|text| Response::Answer { text }),
            Request::StartWorker { query_text, doc_id } => {
                return Reply::Stream(self.manager.start_worker(
                    &query_text,
                    &doc_id,
                    self.stream_buffer,
                ));
            }
            Request::GetDocumentsList => Ok(Response::Documents {
                documents: self.manager.get_documents_list().await,
            }),
        };

        Reply::Response(result.unwrap_or_else(|error| {
            tracing::warn!(error = %error, "Index operation failed");
            Response::error(error_kind(&error), error.to_string())
        }))
    }
}

fn error_kind(error: &EngineError) -> RemoteErrorKind {
    match error {
        EngineError::NotInitialized => RemoteErrorKind::NotInitialized,
        EngineError::InvalidNamespace => RemoteErrorKind::InvalidRequest,
        EngineError::Load { .. } => RemoteErrorKind::DocumentLoad,
        EngineError::Backend(_) => RemoteErrorKind::Backend,
    }
}
