//! Client stub for the index worker.
//!
//! [`IndexClient`] owns at most one request/response connection. It is dialled lazily, or
//! eagerly through [`IndexClient::bootstrap`], and replaced wholesale whenever a transport
//! failure is observed. Streams use dedicated connections, so a long answer never blocks
//! other calls.

use super::connection::Connection;
use super::protocol::{Request, Response};
use super::types::{ClientSettings, RpcError};
use crate::auth::SharedSecret;
use crate::engine::DocumentSummary;
use crate::retry::RetryPolicy;
use crate::streaming::ChunkReceiver;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Operations the front-end needs from the index worker.
#[async_trait]
pub trait IndexApi: Send + Sync {
    /// Bind the worker's active index to `namespace`.
    async fn initialize_index(&self, namespace: &str) -> Result<(), RpcError>;

    /// Index the file at `filepath` (a path on the worker's filesystem).
    async fn insert_into_index(&self, filepath: &str, doc_id: Option<String>)
    -> Result<(), RpcError>;

    /// Answer a query in one response.
    async fn query_index(&self, query_text: &str, doc_id: &str) -> Result<String, RpcError>;

    /// Answer a query incrementally.
    async fn start_worker(&self, query_text: &str, doc_id: &str)
    -> Result<ChunkReceiver, RpcError>;

    /// Metadata of every indexed document.
    async fn get_documents_list(&self) -> Result<Vec<DocumentSummary>, RpcError>;
}

/// Dial with bounded exponential backoff.
///
/// Makes at most `max_retries` attempts in total, and always at least one. A refused connection is followed by the current
/// delay even on the final attempt; other failures are returned as-is when they occur on the
/// final attempt. Authentication mismatches are returned immediately.
pub async fn connect_with_backoff<C, F, Fut>(
    max_retries: u32,
    initial_delay: Duration,
    mut dial: F,
) -> Result<C, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<C, RpcError>>,
{
    let max_retries = max_retries.max(1);
    let mut backoff = RetryPolicy::new(max_retries, initial_delay).backoff();
    let mut last_error = String::new();

    for attempt in 1..=max_retries {
        match dial().await {
            Ok(connection) => {
                if attempt > 1 {
                    tracing::info!(attempt, "Connected to index server");
                }
                return Ok(connection);
            }
            Err(RpcError::AuthenticationMismatch) => return Err(RpcError::AuthenticationMismatch),
            Err(RpcError::ConnectionRefused(address)) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    attempt,
                    max_retries,
                    address = %address,
                    delay_secs = delay.as_secs_f64(),
                    "Index server refused connection; retrying"
                );
                last_error = format!("connection refused by {address}");
                tokio::time::sleep(delay).await;
            }
            Err(err) if attempt == max_retries => {
                tracing::error!(attempt, error = %err, "Final connection attempt failed");
                return Err(err);
            }
            Err(err) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    attempt,
                    max_retries,
                    error = %err,
                    delay_secs = delay.as_secs_f64(),
                    "Connection attempt failed; retrying"
                );
                last_error = err.to_string();
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(RpcError::ConnectionFailure {
        attempts: max_retries,
        last_error,
    })
}

/// Reconnecting client stub.
pub struct IndexClient {
    settings: ClientSettings,
    secret: Arc<SharedSecret>,
    connection: Mutex<Option<Connection>>,
}

impl IndexClient {
    /// Create a client without connecting; the first call dials.
    pub fn new(settings: ClientSettings, secret: SharedSecret) -> Self {
        Self {
            settings,
            secret: Arc::new(secret),
            connection: Mutex::new(None),
        }
    }

    /// Create a client and establish its first connection.
    pub async fn bootstrap(settings: ClientSettings, secret: SharedSecret) -> Result<Self, RpcError> {
        let client = Self::new(settings, secret);
        client.reconnect().await?;
        tracing::info!(address = %client.settings.address, "Index client connected");
        Ok(client)
    }

    /// Drop the current connection and dial a new one.
    pub async fn reconnect(&self) -> Result<(), RpcError> {
        let mut guard = self.connection.lock().await;
        *guard = None;
        *guard = Some(self.dial().await?);
        Ok(())
    }

    async fn dial(&self) -> Result<Connection, RpcError> {
        let address = self.settings.address.as_str();
        let secret = self.secret.as_ref();
        let timeout = self.settings.connect_timeout;
        connect_with_backoff(self.settings.max_retries, self.settings.retry_interval, || {
            Connection::open(address, secret, timeout)
        })
        .await
    }

    async fn call_once(&self, request: &Request) -> Result<Response, CallFailure> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await.map_err(CallFailure::Dial)?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(CallFailure::Call(RpcError::ConnectionClosed));
        };

        match connection.call(request).await {
            Ok(Response::Error { kind, message }) => {
                Err(CallFailure::Call(RpcError::Remote { kind, message }))
            }
            Ok(response) => Ok(response),
            Err(err) => {
                if err.is_transport() {
                    *guard = None;
                }
                Err(CallFailure::Call(err))
            }
        }
    }

    async fn call(&self, request: &Request) -> Result<Response, RpcError> {
        let operation = request.operation();
        match self.call_once(request).await {
            Ok(response) => Ok(response),
            // A failed lazy dial already ran the full backoff sequence.
            Err(CallFailure::Dial(err)) => Err(err),
            Err(CallFailure::Call(err)) if err.is_transport() => {
                tracing::warn!(operation, error = %err, "Remote call failed; reconnecting once");
                let retried = async {
                    self.reconnect().await?;
                    self.call_once(request).await.map_err(CallFailure::into_inner)
                }
                .await;
                retried.map_err(|err| escalate(operation, err))
            }
            Err(CallFailure::Call(err)) => Err(err),
        }
    }

    async fn open_stream_once(
        &self,
        request: &Request,
        patient: bool,
    ) -> Result<ChunkReceiver, RpcError> {
        let connection = if patient {
            self.dial().await?
        } else {
            Connection::open(
                &self.settings.address,
                &self.secret,
                self.settings.connect_timeout,
            )
            .await?
        };
        connection
            .open_stream(request, self.settings.stream_buffer)
            .await
    }
}

/// Where a single call attempt failed.
enum CallFailure {
    /// No connection could be established.
    Dial(RpcError),
    /// The exchange on an established connection failed.
    Call(RpcError),
}

impl CallFailure {
    fn into_inner(self) -> RpcError {
        match self {
            Self::Dial(err) | Self::Call(err) => err,
        }
    }
}

fn escalate(operation: &'static str, err: RpcError) -> RpcError {
    if err.is_transport() {
        RpcError::RemoteCallFailure {
            operation,
            source: Box::new(err),
        }
    } else {
        err
    }
}

fn unexpected(operation: &str, response: Response) -> RpcError {
    RpcError::Protocol(format!("unexpected reply to {operation}: {response:?}"))
}

#[async_trait]
impl IndexApi for IndexClient {
    async fn initialize_index(&self, namespace: &str) -> Result<(), RpcError> {
        let request = Request::InitializeIndex {
            namespace: namespace.to_string(),
        };
        match self.call(&request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(request.operation(), other)),
        }
    }

    async fn insert_into_index(
        &self,
        filepath: &str,
        doc_id: Option<String>,
    ) -> Result<(), RpcError> {
        let request = Request::InsertIntoIndex {
            filepath: filepath.to_string(),
            doc_id,
        };
        match self.call(&request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(request.operation(), other)),
        }
    }

    async fn query_index(&self, query_text: &str, doc_id: &str) -> Result<String, RpcError> {
        let request = Request::QueryIndex {
            query_text: query_text.to_string(),
            doc_id: doc_id.to_string(),
        };
        match self.call(&request).await? {
            Response::Answer { text } => Ok(text),
            other => Err(unexpected(request.operation(), other)),
        }
    }

    async fn start_worker(
        &self,
        query_text: &str,
        doc_id: &str,
    ) -> Result<ChunkReceiver, RpcError> {
        let request = Request::StartWorker {
            query_text: query_text.to_string(),
            doc_id: doc_id.to_string(),
        };
        match self.open_stream_once(&request, false).await {
            Err(err) if err.is_transport() => {
                tracing::warn!(error = %err, "Stream connection failed; reconnecting once");
                self.open_stream_once(&request, true)
                    .await
                    .map_err(|err| escalate(request.operation(), err))
            }
            other => other,
        }
    }

    async fn get_documents_list(&self) -> Result<Vec<DocumentSummary>, RpcError> {
        let request = Request::GetDocumentsList;
        match self.call(&request).await? {
            Response::Documents { documents } => Ok(documents),
            other => Err(unexpected(request.operation(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn refused_connections_back_off_then_fail() {
        let started = Instant::now();
        let attempts = Arc::new(StdMutex::new(Vec::new()));

        let result: Result<(), RpcError> =
            connect_with_backoff(3, Duration::from_secs(1), || {
                attempts.lock().unwrap().push(started.elapsed());
                async { Err(RpcError::ConnectionRefused("127.0.0.1:5602".into())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RpcError::ConnectionFailure { attempts: 3, .. })
        ));
        assert_eq!(
            *attempts.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(3),
            ]
        );
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_mismatch_is_not_retried() {
        let started = Instant::now();
        let mut calls = 0;

        let result: Result<(), RpcError> =
            connect_with_backoff(5, Duration::from_secs(1), || {
                calls += 1;
                async { Err(RpcError::AuthenticationMismatch) }
            })
            .await;

        assert!(matches!(result, Err(RpcError::AuthenticationMismatch)));
        assert_eq!(calls, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_surface_on_the_final_attempt() {
        let started = Instant::now();
        let mut calls = 0;

        let result: Result<(), RpcError> =
            connect_with_backoff(2, Duration::from_secs(1), || {
                calls += 1;
                async { Err(RpcError::ConnectionClosed) }
            })
            .await;

        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert_eq!(calls, 2);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_once_the_server_accepts() {
        let mut calls = 0;
        let result = connect_with_backoff(4, Duration::from_secs(1), || {
            calls += 1;
            let outcome = if calls < 3 {
                Err(RpcError::ConnectionRefused("127.0.0.1:5602".into()))
            } else {
                Ok(calls)
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn escalation_wraps_only_transport_failures() {
        let wrapped = escalate("query_index", RpcError::ConnectionClosed);
        assert!(matches!(
            wrapped,
            RpcError::RemoteCallFailure {
                operation: "query_index",
                ..
            }
        ));
        assert!(matches!(
            escalate("query_index", RpcError::AuthenticationMismatch),
            RpcError::AuthenticationMismatch
        ));
    }
}
