//! Bounded chunk queue with an end-of-stream marker and cancellation.
//!
//! A [`ChunkSender`] is consumed by [`ChunkSender::finish`] or [`ChunkSender::fail`], so a
//! producer can emit at most one end marker. If the producer disappears without emitting it,
//! [`ChunkReceiver::recv`] synthesises one. Dropping the receiver cancels the producer.

use std::fmt::Display;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Prefix of the in-band chunk reporting a producer failure.
pub const ERROR_PREFIX: &str = "Error: ";

/// One item observed by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// Incremental text.
    Chunk(String),
    /// End-of-stream marker; always the last item.
    End,
}

/// The consumer went away or cancelled the stream.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("stream consumer is gone")]
pub struct StreamClosed;

/// Create a queue holding at most `capacity` undelivered items.
pub fn channel(capacity: usize) -> (ChunkSender, ChunkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    (
        ChunkSender {
            tx,
            cancel: cancel.clone(),
        },
        ChunkReceiver {
            rx,
            cancel,
            finished: false,
        },
    )
}

/// Producer half of a stream queue.
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<StreamItem>,
    cancel: CancellationToken,
}

impl ChunkSender {
    /// Enqueue a chunk, waiting for capacity. Fails once the consumer is gone.
    pub async fn send(&self, chunk: impl Into<String>) -> Result<(), StreamClosed> {
        self.push(StreamItem::Chunk(chunk.into())).await
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the consumer cancels or drops its half.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// Emit the end marker.
    pub async fn finish(self) {
        let _ = self.push(StreamItem::End).await;
    }

    /// Emit one `Error: <err>` chunk followed by the end marker.
    pub async fn fail(self, err: impl Display) {
        if self
            .push(StreamItem::Chunk(format!("{ERROR_PREFIX}{err}")))
            .await
            .is_ok()
        {
            let _ = self.push(StreamItem::End).await;
        }
    }

    async fn push(&self, item: StreamItem) -> Result<(), StreamClosed> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StreamClosed),
            sent = self.tx.send(item) => sent.map_err(|_| StreamClosed),
        }
    }
}

/// Consumer half of a stream queue.
#[derive(Debug)]
pub struct ChunkReceiver {
    rx: mpsc::Receiver<StreamItem>,
    cancel: CancellationToken,
    finished: bool,
}

impl ChunkReceiver {
    /// Next item. Returns [`StreamItem::End`] forever once the stream has ended.
    pub async fn recv(&mut self) -> StreamItem {
        if self.finished {
            return StreamItem::End;
        }
        match self.rx.recv().await {
            Some(StreamItem::Chunk(chunk)) => StreamItem::Chunk(chunk),
            Some(StreamItem::End) => {
                self.finished = true;
                StreamItem::End
            }
            None => {
                tracing::warn!("Stream producer vanished without an end marker");
                self.finished = true;
                StreamItem::End
            }
        }
    }

    /// Next chunk, or `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Option<String> {
        match self.recv().await {
            StreamItem::Chunk(chunk) => Some(chunk),
            StreamItem::End => None,
        }
    }

    /// Drain every remaining chunk.
    pub async fn collect(mut self) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }
}

impl Drop for ChunkReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_chunks_in_order_then_end() {
        let (sender, receiver) = channel(4);
        tokio::spawn(async move {
            for chunk in ["a", "b", "c"] {
                sender.send(chunk).await.unwrap();
            }
            sender.finish().await;
        });

        assert_eq!(receiver.collect().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failure_is_one_error_chunk_then_end() {
        let (sender, mut receiver) = channel(4);
        sender.send("partial").await.unwrap();
        sender.fail("index exploded").await;

        assert_eq!(receiver.recv().await, StreamItem::Chunk("partial".into()));
        assert_eq!(
            receiver.recv().await,
            StreamItem::Chunk("Error: index exploded".into())
        );
        assert_eq!(receiver.recv().await, StreamItem::End);
        assert_eq!(receiver.recv().await, StreamItem::End);
    }

    #[tokio::test]
    async fn vanished_producer_yields_synthetic_end() {
        let (sender, mut receiver) = channel(4);
        sender.send("only").await.unwrap();
        drop(sender);

        assert_eq!(receiver.recv().await, StreamItem::Chunk("only".into()));
        assert_eq!(receiver.recv().await, StreamItem::End);
        assert_eq!(receiver.recv().await, StreamItem::End);
    }

    #[tokio::test]
    async fn dropping_receiver_unblocks_a_full_sender() {
        let (sender, receiver) = channel(1);
        sender.send("fills the buffer").await.unwrap();

        let blocked = tokio::spawn(async move { sender.send("waits").await });
        tokio::task::yield_now().await;
        drop(receiver);

        assert_eq!(blocked.await.unwrap(), Err(StreamClosed));
    }

    #[tokio::test]
    async fn dropped_receiver_is_visible_to_the_producer() {
        let (sender, receiver) = channel(2);
        assert!(!sender.is_closed());
        drop(receiver);

        sender.cancelled().await;
        assert!(sender.is_closed());
        assert_eq!(sender.send("late").await, Err(StreamClosed));
    }
}
