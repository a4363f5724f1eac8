//! Owner of all index state inside the worker process.
//!
//! `initialize_index` and `insert_into_index` rebind or mutate state and are serialised behind
//! one writer lock. Reads (queries, listings) only take the reader-writer locks, so they run
//! concurrently with each other. Each namespace has its own index instance, so streams over
//! different namespaces never share mutable state.
//!
//! Only namespaces that hold documents are retained. Initialising an unknown namespace binds a
//! fresh empty index as the active one without recording it, so callers cannot grow the
//! worker's memory by naming new namespaces.

use super::documents::{DocumentTable, describe};
use super::types::{
    ChunkStream, DocumentLoader, DocumentSummary, EngineError, IndexBackend, NamespaceIndex,
};
use crate::streaming::{ChunkReceiver, NamespaceInit, StreamJob, StreamSource, spawn_worker};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

struct Binding {
    namespace: String,
    index: Arc<dyn NamespaceIndex>,
}

/// Coordinates the backend, the loader, and the document table.
pub struct IndexManager {
    backend: Arc<dyn IndexBackend>,
    loader: Arc<dyn DocumentLoader>,
    namespaces: RwLock<HashMap<String, Arc<dyn NamespaceIndex>>>,
    active: RwLock<Option<Binding>>,
    documents: RwLock<DocumentTable>,
    writer: Mutex<()>,
}

impl IndexManager {
    /// Build a manager over the given collaborators.
    pub fn new(backend: Arc<dyn IndexBackend>, loader: Arc<dyn DocumentLoader>) -> Self {
        Self {
            backend,
            loader,
            namespaces: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
            documents: RwLock::new(DocumentTable::default()),
            writer: Mutex::new(()),
        }
    }

    /// Make `namespace` the active binding. An unknown namespace is bound to a fresh empty
    /// index, which is kept only once a document is inserted into it.
    pub async fn initialize_index(&self, namespace: &str) -> Result<(), EngineError> {
        let _writer = self.writer.lock().await;
        self.bind(namespace).await.map(|_| ())
    }

    /// Load the document at `path`, index it, and record its metadata.
    ///
    /// The document id defaults to a fresh UUID and also names the namespace it is indexed
    /// under. Returns the id used.
    pub async fn insert_into_index(
        &self,
        path: &Path,
        doc_id: Option<String>,
    ) -> Result<String, EngineError> {
        let doc_id = doc_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let _writer = self.writer.lock().await;
        let index = self.bind(&doc_id).await?;
        let document = self.loader.load(path).await?;
        index.insert(&doc_id, &document).await?;
        self.namespaces
            .write()
            .await
            .entry(doc_id.clone())
            .or_insert_with(|| Arc::clone(&index));

        let record = describe(&doc_id, path, &document);
        tracing::info!(
            doc_id = %doc_id,
            filename = %record.filename,
            length = record.length,
            "Indexed document"
        );
        self.documents.write().await.upsert(record);
        Ok(doc_id)
    }

    /// Answer `query_text` from namespace `doc_id`, or from the active namespace when
    /// `doc_id` has not been opened.
    pub async fn query_index(&self, query_text: &str, doc_id: &str) -> Result<String, EngineError> {
        let index = self.resolve(doc_id).await?;
        index.query(query_text).await
    }

    /// Stream the answer to `query_text` from namespace `doc_id`, initialising it first.
    pub fn start_worker(
        self: &Arc<Self>,
        query_text: &str,
        doc_id: &str,
        capacity: usize,
    ) -> ChunkReceiver {
        let manager = Arc::clone(self);
        let init: NamespaceInit = Box::new(move |namespace| {
            async move { manager.initialize_index(&namespace).await }.boxed()
        });
        let job = StreamJob {
            query_text: query_text.to_string(),
            namespace: doc_id.to_string(),
        };
        spawn_worker(Arc::clone(self), job, Some(init), capacity)
    }

    /// Metadata of every indexed document, in insertion order.
    pub async fn get_documents_list(&self) -> Vec<DocumentSummary> {
        self.documents.read().await.snapshot()
    }

    async fn bind(&self, namespace: &str) -> Result<Arc<dyn NamespaceIndex>, EngineError> {
        if namespace.is_empty() {
            return Err(EngineError::InvalidNamespace);
        }

        let index = match self.lookup(namespace).await {
            Some(index) => index,
            None => {
                tracing::debug!(namespace, "Binding empty namespace index");
                self.backend.open_namespace(namespace).await?
            }
        };
        *self.active.write().await = Some(Binding {
            namespace: namespace.to_string(),
            index: Arc::clone(&index),
        });
        Ok(index)
    }

    /// Index for `namespace` if it holds documents or is the active binding.
    async fn lookup(&self, namespace: &str) -> Option<Arc<dyn NamespaceIndex>> {
        if let Some(index) = self.namespaces.read().await.get(namespace) {
            return Some(Arc::clone(index));
        }
        self.active
            .read()
            .await
            .as_ref()
            .filter(|binding| binding.namespace == namespace)
            .map(|binding| Arc::clone(&binding.index))
    }

    async fn resolve(&self, namespace: &str) -> Result<Arc<dyn NamespaceIndex>, EngineError> {
        if let Some(index) = self.lookup(namespace).await {
            return Ok(index);
        }
        self.active
            .read()
            .await
            .as_ref()
            .map(|binding| Arc::clone(&binding.index))
            .ok_or(EngineError::NotInitialized)
    }
}

#[async_trait]
impl StreamSource for IndexManager {
    async fn open_stream(
        &self,
        namespace: &str,
        query_text: &str,
    ) -> Result<ChunkStream, EngineError> {
        // Streams never fall back to another namespace's binding.
        let index = match self.lookup(namespace).await {
            Some(index) => index,
            None => self.backend.open_namespace(namespace).await?,
        };
        index.query_stream(query_text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{InMemoryBackend, NO_MATCH_ANSWER, PlainTextLoader};
    use futures_util::StreamExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn manager() -> Arc<IndexManager> {
        Arc::new(IndexManager::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(PlainTextLoader),
        ))
    }

    async fn active(manager: &IndexManager) -> Option<String> {
        manager
            .active
            .read()
            .await
            .as_ref()
            .map(|binding| binding.namespace.clone())
    }

    fn write_doc(dir: &TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[tokio::test]
    async fn inserted_documents_are_listed_with_their_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(&dir, "doc.pptx", "Slide one covers revenue.");
        let manager = manager();

        let id = manager
            .insert_into_index(&path, Some("abc".into()))
            .await
            .unwrap();
        assert_eq!(id, "abc");

        let documents = manager.get_documents_list().await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, "abc");
        assert!(documents[0].filename.ends_with("doc.pptx"));
        assert_eq!(documents[0].title, "doc.pptx");
    }

    #[tokio::test]
    async fn missing_doc_id_gets_a_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(&dir, "deck.pptx", "text");
        let manager = manager();

        let id = manager.insert_into_index(&path, None).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(active(&manager).await.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn query_before_initialization_fails() {
        let result = manager().query_index("anything", "missing").await;
        assert!(matches!(result, Err(EngineError::NotInitialized)));
    }

    #[tokio::test]
    async fn empty_namespace_is_rejected() {
        let result = manager().initialize_index("").await;
        assert!(matches!(result, Err(EngineError::InvalidNamespace)));
    }

    #[tokio::test]
    async fn namespaces_answer_independently() {
        let dir = tempfile::tempdir().unwrap();
        let revenue = write_doc(&dir, "a.txt", "Revenue grew strongly.");
        let hiring = write_doc(&dir, "b.txt", "Hiring paused this year.");
        let manager = manager();
        manager.insert_into_index(&revenue, Some("a".into())).await.unwrap();
        manager.insert_into_index(&hiring, Some("b".into())).await.unwrap();

        assert_eq!(
            manager.query_index("revenue", "a").await.unwrap(),
            "Revenue grew strongly."
        );
        assert_eq!(manager.query_index("revenue", "b").await.unwrap(), NO_MATCH_ANSWER);
    }

    #[tokio::test]
    async fn unknown_namespace_falls_back_to_active_binding() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(&dir, "a.txt", "Margins improved.");
        let manager = manager();
        manager.insert_into_index(&path, Some("a".into())).await.unwrap();

        assert_eq!(
            manager.query_index("margins", "never-opened").await.unwrap(),
            "Margins improved."
        );
    }

    #[tokio::test]
    async fn load_failure_leaves_the_table_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        let result = manager
            .insert_into_index(&dir.path().join("absent.pptx"), Some("x".into()))
            .await;

        assert!(matches!(result, Err(EngineError::Load { .. })));
        assert!(manager.get_documents_list().await.is_empty());
    }

    #[tokio::test]
    async fn start_worker_initialises_and_streams() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(&dir, "a.txt", "Costs fell sharply");
        let manager = manager();
        manager.insert_into_index(&path, Some("a".into())).await.unwrap();
        manager.initialize_index("elsewhere").await.unwrap();

        let chunks = manager.start_worker("costs", "a", 4).collect().await;
        assert_eq!(chunks.concat(), "Costs fell sharply");
        assert_eq!(active(&manager).await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn initializing_empty_namespaces_retains_nothing() {
        let manager = manager();
        for i in 0..100 {
            manager.initialize_index(&format!("probe-{i}")).await.unwrap();
        }

        assert!(manager.namespaces.read().await.is_empty());
        assert_eq!(active(&manager).await.as_deref(), Some("probe-99"));
        assert_eq!(manager.query_index("anything", "probe-99").await.unwrap(), NO_MATCH_ANSWER);
    }

    #[tokio::test]
    async fn inserting_into_the_active_empty_namespace_retains_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(&dir, "a.txt", "Churn dropped.");
        let manager = manager();
        manager.initialize_index("a").await.unwrap();
        manager.insert_into_index(&path, Some("a".into())).await.unwrap();
        manager.initialize_index("elsewhere").await.unwrap();

        assert_eq!(manager.namespaces.read().await.len(), 1);
        assert_eq!(manager.query_index("churn", "a").await.unwrap(), "Churn dropped.");
    }

    #[tokio::test]
    async fn streams_over_unknown_namespaces_do_not_borrow_the_active_one() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_doc(&dir, "a.txt", "Costs fell sharply");
        let manager = manager();
        manager.insert_into_index(&path, Some("a".into())).await.unwrap();

        let chunks: Vec<String> = manager
            .open_stream("never-opened", "costs")
            .await
            .unwrap()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), NO_MATCH_ANSWER);
    }

    #[tokio::test]
    async fn start_worker_reports_invalid_namespace_in_band() {
        let chunks = manager().start_worker("q", "", 4).collect().await;
        assert_eq!(chunks, vec!["Error: Namespace must not be empty"]);
    }

    #[tokio::test]
    async fn concurrent_inserts_all_land_in_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let path = write_doc(&dir, &format!("d{i}.txt"), &format!("document number {i}"));
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move {
                manager.insert_into_index(&path, Some(format!("d{i}"))).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut ids: Vec<_> = manager
            .get_documents_list()
            .await
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        ids.sort();
        assert_eq!(ids, (0..8).map(|i| format!("d{i}")).collect::<Vec<_>>());
    }
}
