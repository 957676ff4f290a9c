use bytes::Bytes;
use tracing::{error, warn};

use crate::metrics::PipelineMetrics;
use crate::queue::QueueWriter;

/// Status codes the upstream uses to signal rate limiting.
const RATE_LIMIT_STATUS: [u16; 2] = [420, 429];

/// What the upstream client should do after a delivery callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Keep streaming (or reconnect, for errors).
    Continue,
    /// Stop the stream for good.
    Disconnect,
}

/// Adapter between the upstream client callbacks and the ingestion queue.
#[derive(Clone)]
pub struct StreamProducer {
    writer: QueueWriter,
    metrics: PipelineMetrics,
}

impl StreamProducer {
    pub fn new(writer: QueueWriter, metrics: PipelineMetrics) -> Self {
        Self { writer, metrics }
    }

    /// Hands one raw record to the queue.
    pub fn on_data(&self, raw: Bytes) -> Delivery {
        self.metrics.received_total.inc();
        match self.writer.enqueue(raw) {
            Ok(()) => Delivery::Continue,
            Err(e) => {
                self.metrics.enqueue_failures_total.inc();
                error!(error = %e, "Failed to enqueue record, disconnecting from the stream");
                Delivery::Disconnect
            }
        }
    }

    /// Decides whether the upstream may reconnect after an error status.
    pub fn on_error(&self, status: u16) -> Delivery {
        if RATE_LIMIT_STATUS.contains(&status) {
            warn!(status, "Rate limited by the stream, disconnecting");
            return Delivery::Disconnect;
        }
        warn!(status, "Stream returned an error status");
        Delivery::Continue
    }
}
