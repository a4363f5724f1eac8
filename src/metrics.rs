use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing streaming activity on the front-end.
#[derive(Default)]
pub struct StreamMetrics {
    streams_opened: AtomicU64,
    streams_completed: AtomicU64,
    streams_aborted: AtomicU64,
    chunks_forwarded: AtomicU64,
}

impl StreamMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stream handed to an HTTP response.
    pub fn record_open(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one chunk written to a response body.
    pub fn record_chunk(&self) {
        self.chunks_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stream that reached its end-of-stream marker.
    pub fn record_completed(&self) {
        self.streams_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stream whose HTTP client went away before the end marker.
    pub fn record_aborted(&self) {
        self.streams_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            streams_aborted: self.streams_aborted.load(Ordering::Relaxed),
            chunks_forwarded: self.chunks_forwarded.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of streaming counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StreamMetricsSnapshot {
    /// Streams started since process start.
    pub streams_opened: u64,
    /// Streams that delivered their end marker.
    pub streams_completed: u64,
    /// Streams dropped by the client mid-flight.
    pub streams_aborted: u64,
    /// Total chunks written across all streams.
    pub chunks_forwarded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_stream_lifecycle() {
        let metrics = StreamMetrics::new();
        metrics.record_open();
        metrics.record_open();
        metrics.record_chunk();
        metrics.record_chunk();
        metrics.record_chunk();
        metrics.record_completed();
        metrics.record_aborted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.streams_opened, 2);
        assert_eq!(snapshot.chunks_forwarded, 3);
        assert_eq!(snapshot.streams_completed, 1);
        assert_eq!(snapshot.streams_aborted, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        let snapshot = StreamMetrics::new().snapshot();
        assert_eq!(snapshot.streams_opened, 0);
        assert_eq!(snapshot.chunks_forwarded, 0);
    }
}
