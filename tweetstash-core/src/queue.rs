//! Unbounded hand-off between the stream producer and the pipeline coordinator. The upstream
//! delivery path must never stall, so the queue never exerts backpressure; the coordinator only
//! watches its depth.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::{Error, Result};

/// Creates a connected writer/reader pair.
pub fn ingestion_queue() -> (QueueWriter, QueueReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueWriter { tx }, QueueReader { rx })
}

/// Producer side of the queue. Cheap to clone and safe to use from any task.
#[derive(Clone, Debug)]
pub struct QueueWriter {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl QueueWriter {
    /// Enqueues a raw payload without waiting. Fails only if the reader is gone.
    pub fn enqueue(&self, raw: Bytes) -> Result<()> {
        self.tx
            .send(raw)
            .map_err(|_| Error::Queue("ingestion queue is closed".to_string()))
    }
}

/// Consumer side of the queue, owned by exactly one coordinator.
#[derive(Debug)]
pub struct QueueReader {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl QueueReader {
    /// Waits for the next payload. Returns `None` once every writer is dropped and the queue has
    /// been drained. Cancel safe.
    pub async fn dequeue(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Takes the next payload if one is ready.
    pub fn try_dequeue(&mut self) -> Option<Bytes> {
        match self.rx.try_recv() {
            Ok(raw) => Some(raw),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Number of payloads waiting in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
