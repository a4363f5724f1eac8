//! Index engine: the state owner plus its pluggable loader and backend.

pub mod documents;
mod loader;
mod manager;
mod memory;
pub mod types;

pub use loader::PlainTextLoader;
pub use manager::IndexManager;
pub use memory::{InMemoryBackend, InMemoryIndex, NO_MATCH_ANSWER};
pub use types::{
    ChunkStream, DocumentLoader, DocumentSummary, EngineError, IndexBackend, LoadedDocument,
    NamespaceIndex,
};
