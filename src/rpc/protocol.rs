//! Wire protocol between the front-end and the index worker.
//!
//! Every frame is a 4-byte big-endian length followed by a JSON document of that length.
//! After the handshake the client sends [`Request`] frames and the worker answers each with
//! one [`Response`] frame, except for `start_worker`, which is answered by
//! `stream_started`, any number of `chunk` frames, and a final `end_of_stream`.

use super::types::{RemoteErrorKind, RpcError};
use crate::engine::DocumentSummary;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Names of the operations the worker exposes.
pub const OPERATIONS: [&str; 5] = [
    "initialize_index",
    "insert_into_index",
    "query_index",
    "start_worker",
    "get_documents_list",
];

/// Operations a client may invoke on the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Bind the active index to a namespace.
    InitializeIndex {
        /// Namespace to open.
        namespace: String,
    },
    /// Load, chunk, and index a document.
    InsertIntoIndex {
        /// Path of the document on the worker's filesystem.
        filepath: String,
        /// Identifier for the document; generated when absent.
        doc_id: Option<String>,
    },
    /// Answer a query in one response.
    QueryIndex {
        /// Question text.
        query_text: String,
        /// Namespace to query.
        doc_id: String,
    },
    /// Answer a query incrementally.
    StartWorker {
        /// Question text.
        query_text: String,
        /// Namespace to query.
        doc_id: String,
    },
    /// Snapshot of the indexed documents.
    GetDocumentsList,
}

impl Request {
    /// Wire name of the operation.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::InitializeIndex { .. } => OPERATIONS[0],
            Self::InsertIntoIndex { .. } => OPERATIONS[1],
            Self::QueryIndex { .. } => OPERATIONS[2],
            Self::StartWorker { .. } => OPERATIONS[3],
            Self::GetDocumentsList => OPERATIONS[4],
        }
    }
}

/// Messages the worker sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// The operation completed without a payload.
    Done,
    /// Single-shot query answer.
    Answer {
        /// Answer text.
        text: String,
    },
    /// Indexed documents in table order.
    Documents {
        /// Document metadata records.
        documents: Vec<DocumentSummary>,
    },
    /// The connection now carries a stream.
    StreamStarted,
    /// One incremental unit of a streamed answer.
    Chunk {
        /// Chunk text.
        text: String,
    },
    /// The stream is complete; the worker closes the connection next.
    EndOfStream,
    /// The operation failed.
    Error {
        /// Failure category.
        kind: RemoteErrorKind,
        /// Human-readable description.
        message: String,
    },
}

impl Response {
    /// Build an error response.
    pub fn error(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

/// Serialize `message` and write it as one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(payload.len()));
    }
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` when the peer closed the connection between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, RpcError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RpcError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_use_method_and_params_tags() {
        let request = Request::InsertIntoIndex {
            filepath: "/tmp/doc.pptx".into(),
            doc_id: Some("abc".into()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "method": "insert_into_index",
                "params": { "filepath": "/tmp/doc.pptx", "doc_id": "abc" }
            })
        );

        let listing: Request =
            serde_json::from_value(json!({ "method": "get_documents_list" })).unwrap();
        assert_eq!(listing, Request::GetDocumentsList);
    }

    #[test]
    fn operation_names_cover_the_closed_set() {
        let requests = [
            Request::InitializeIndex {
                namespace: "ns".into(),
            },
            Request::InsertIntoIndex {
                filepath: "f".into(),
                doc_id: None,
            },
            Request::QueryIndex {
                query_text: "q".into(),
                doc_id: "ns".into(),
            },
            Request::StartWorker {
                query_text: "q".into(),
                doc_id: "ns".into(),
            },
            Request::GetDocumentsList,
        ];
        let names: Vec<_> = requests.iter().map(Request::operation).collect();
        assert_eq!(names, OPERATIONS);
    }

    #[test]
    fn error_responses_carry_kind() {
        let value = serde_json::to_value(Response::error(
            RemoteErrorKind::NotInitialized,
            "call initialize_index first",
        ))
        .unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["kind"], "not_initialized");
    }

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &Response::Chunk { text: "héllo ".into() })
            .await
            .unwrap();
        write_frame(&mut client, &Response::EndOfStream).await.unwrap();
        drop(client);

        let first: Option<Response> = read_frame(&mut server).await.unwrap();
        assert_eq!(first, Some(Response::Chunk { text: "héllo ".into() }));
        let second: Option<Response> = read_frame(&mut server).await.unwrap();
        assert_eq!(second, Some(Response::EndOfStream));
        let closed: Option<Response> = read_frame(&mut server).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = ((MAX_FRAME_SIZE + 1) as u32).to_be_bytes();
        client.write_all(&len).await.unwrap();

        let result: Result<Option<Response>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(RpcError::FrameTooLarge(size)) if size == MAX_FRAME_SIZE + 1));
    }
}
