//! Core data types, errors, and collaborator traits of the index engine.

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors emitted by the index engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A query arrived before any namespace was initialized.
    #[error("Index not initialized; call initialize_index first")]
    NotInitialized,
    /// Namespaces must be non-empty.
    #[error("Namespace must not be empty")]
    InvalidNamespace,
    /// The document could not be read from disk.
    #[error("Failed to load document {path}: {source}")]
    Load {
        /// Path we attempted to read.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// The index backend rejected an operation.
    #[error("Index backend failure: {0}")]
    Backend(String),
}

/// Metadata record kept for every indexed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Document identifier; also the namespace the document was indexed under.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Excerpt of the document text.
    pub preview: String,
    /// Character count of the extracted text.
    pub length: usize,
    /// Basename of the source file.
    pub filename: String,
}

/// Text extracted from a document by a [`DocumentLoader`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedDocument {
    /// Full extracted text.
    pub text: String,
    /// Title found in the document, if any.
    pub title: Option<String>,
}

/// Incremental answer produced by [`NamespaceIndex::query_stream`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// Reads a document from disk and extracts its text.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load the document at `path`.
    async fn load(&self, path: &Path) -> Result<LoadedDocument, EngineError>;
}

/// Factory for namespace-scoped indexes.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Create an empty index for `namespace`. Callers keep the instances they need.
    async fn open_namespace(&self, namespace: &str) -> Result<Arc<dyn NamespaceIndex>, EngineError>;
}

/// A searchable index over the documents of one namespace.
#[async_trait]
pub trait NamespaceIndex: Send + Sync {
    /// Add `document` under `doc_id`, replacing anything previously stored under that id.
    async fn insert(&self, doc_id: &str, document: &LoadedDocument) -> Result<(), EngineError>;

    /// Answer `query_text` in one piece.
    async fn query(&self, query_text: &str) -> Result<String, EngineError>;

    /// Answer `query_text` as an ordered stream of text units.
    async fn query_stream(&self, query_text: &str) -> Result<ChunkStream, EngineError>;
}
