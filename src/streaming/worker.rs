//! Background tasks that turn a streaming query into queue items.

use super::queue::{ChunkReceiver, ChunkSender, channel};
use crate::engine::{ChunkStream, EngineError};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Parameters of one streaming query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamJob {
    /// Question text.
    pub query_text: String,
    /// Namespace answering the question.
    pub namespace: String,
}

/// Something that can answer a query incrementally.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Open a streaming answer for `query_text` within `namespace`.
    async fn open_stream(&self, namespace: &str, query_text: &str)
    -> Result<ChunkStream, EngineError>;
}

/// Callback run with the namespace before the stream is opened.
pub type NamespaceInit =
    Box<dyn FnOnce(String) -> BoxFuture<'static, Result<(), EngineError>> + Send>;

enum Outcome {
    Complete,
    Cancelled,
}

/// Start a worker task for `job` and return the queue it fills.
pub fn spawn_worker<S>(
    source: Arc<S>,
    job: StreamJob,
    init: Option<NamespaceInit>,
    capacity: usize,
) -> ChunkReceiver
where
    S: StreamSource + ?Sized + 'static,
{
    let (sender, receiver) = channel(capacity);
    tokio::spawn(run_worker(source, job, init, sender));
    receiver
}

/// Produce every chunk of `job` into `sender`, then exactly one end marker.
///
/// Failures during initialisation or querying become a single `Error: ...` chunk. The worker
/// stops between chunks once the consumer is gone.
pub async fn run_worker<S>(
    source: Arc<S>,
    job: StreamJob,
    init: Option<NamespaceInit>,
    sender: ChunkSender,
) where
    S: StreamSource + ?Sized,
{
    match produce(source.as_ref(), &job, init, &sender).await {
        Ok(Outcome::Complete) => {
            tracing::debug!(namespace = %job.namespace, "Stream completed");
            sender.finish().await;
        }
        Ok(Outcome::Cancelled) => {
            tracing::debug!(namespace = %job.namespace, "Stream consumer went away; worker stopped");
        }
        Err(error) => {
            tracing::warn!(namespace = %job.namespace, error = %error, "Streaming worker failed");
            sender.fail(error).await;
        }
    }
}

async fn produce<S>(
    source: &S,
    job: &StreamJob,
    init: Option<NamespaceInit>,
    sender: &ChunkSender,
) -> Result<Outcome, EngineError>
where
    S: StreamSource + ?Sized,
{
    if let Some(init) = init {
        init(job.namespace.clone()).await?;
    }
    if sender.is_closed() {
        return Ok(Outcome::Cancelled);
    }
    let mut stream = source.open_stream(&job.namespace, &job.query_text).await?;

    loop {
        tokio::select! {
            biased;
            _ = sender.cancelled() => return Ok(Outcome::Cancelled),
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    if sender.send(chunk).await.is_err() {
                        return Ok(Outcome::Cancelled);
                    }
                }
                Some(Err(error)) => return Err(error),
                None => return Ok(Outcome::Complete),
            },
        }
    }
}
