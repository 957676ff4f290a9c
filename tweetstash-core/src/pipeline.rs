//! The pipeline coordinator. Takes raw payloads off the ingestion queue, tags them, groups them
//! into batches and archives every full batch.
//!
//! ```text
//!            shutdown signal
//!   Running ----------------> Draining --(signal set and queue empty)--> Stopped
//!      |                         ^
//!      +--(every writer gone)----+
//! ```
//!
//! A payload that is already queued always wins over the shutdown signal, so everything enqueued
//! before the signal is processed before the coordinator stops.

use std::time::Instant;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveStore, Archiver};
use crate::batch::BatchAccumulator;
use crate::message::Record;
use crate::metrics::{DROP_REASON_FLUSH_FAILED, DROP_REASON_SHUTDOWN, PipelineMetrics};
use crate::queue::QueueReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineState {
    /// Waiting for payloads, watching for the shutdown signal.
    Running,
    /// Emptying the queue without waiting for new payloads.
    Draining,
    Stopped,
}

/// Totals of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Records appended to a batch.
    pub processed: usize,
    /// Payloads skipped because they could not be parsed or batched.
    pub skipped: usize,
    pub batches_flushed: usize,
    pub batches_failed: usize,
    /// Records of batches whose flush failed.
    pub records_lost: usize,
    /// Records of the partial batch left behind at stop.
    pub records_unflushed: usize,
}

pub struct Pipeline<S> {
    reader: QueueReader,
    accumulator: BatchAccumulator,
    archiver: Archiver<S>,
    keyword: String,
    flush_on_shutdown: bool,
    queue_high_water_mark: usize,
    above_high_water_mark: bool,
    metrics: PipelineMetrics,
    state: PipelineState,
    report: PipelineReport,
}

impl<S> Pipeline<S>
where
    S: ArchiveStore,
{
    pub fn new(
        reader: QueueReader,
        archiver: Archiver<S>,
        keyword: impl Into<String>,
        batch_size: usize,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            reader,
            accumulator: BatchAccumulator::new(batch_size),
            archiver,
            keyword: keyword.into(),
            flush_on_shutdown: false,
            queue_high_water_mark: 0,
            above_high_water_mark: false,
            metrics,
            state: PipelineState::Running,
            report: PipelineReport::default(),
        }
    }

    /// Flush the partial batch at stop instead of dropping it.
    pub fn flush_on_shutdown(mut self, flush_on_shutdown: bool) -> Self {
        self.flush_on_shutdown = flush_on_shutdown;
        self
    }

    /// Queue depth that triggers a warning, 0 disables it.
    pub fn queue_high_water_mark(mut self, queue_high_water_mark: usize) -> Self {
        self.queue_high_water_mark = queue_high_water_mark;
        self
    }

    /// Runs until `shutdown` is set and the queue has been drained.
    pub async fn run(mut self, shutdown: CancellationToken) -> PipelineReport {
        info!(keyword = %self.keyword, "Started the pipeline");

        loop {
            match self.state {
                PipelineState::Running => {
                    let next = tokio::select! {
                        biased;
                        raw = self.reader.dequeue() => Some(raw),
                        _ = shutdown.cancelled() => None,
                    };

                    match next {
                        Some(Some(raw)) => self.process(raw).await,
                        Some(None) => {
                            info!("Every producer is gone, draining the queue");
                            self.state = PipelineState::Draining;
                        }
                        None => {
                            info!(
                                pending = self.reader.len(),
                                "Shutdown signal received, draining the queue"
                            );
                            self.state = PipelineState::Draining;
                        }
                    }
                }
                PipelineState::Draining => match self.reader.try_dequeue() {
                    Some(raw) => self.process(raw).await,
                    None => {
                        // the queue can only be declared done once the signal is set
                        shutdown.cancelled().await;
                        self.stop().await;
                    }
                },
                PipelineState::Stopped => break,
            }
        }

        info!(report = ?self.report, "Pipeline stopped");
        self.report
    }

    async fn process(&mut self, raw: Bytes) {
        self.watch_queue_depth();

        let record = match Record::tagged(&raw, &self.keyword) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, bytes = raw.len(), "Skipping record");
                self.skip();
                return;
            }
        };

        match self.accumulator.append(record) {
            Ok(full) => {
                self.report.processed += 1;
                self.metrics.processed_total.inc();
                debug!(processed = self.report.processed, "Processed record");
                if full {
                    self.flush().await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Skipping record");
                self.skip();
            }
        }
    }

    fn skip(&mut self) {
        self.report.skipped += 1;
        self.metrics.skipped_total.inc();
    }

    /// Archives the current batch and starts a new one, whatever the outcome. A failed batch is
    /// not retried.
    async fn flush(&mut self) {
        let count = self.accumulator.len();
        let start = Instant::now();

        match self
            .archiver
            .flush(self.accumulator.records(), &self.keyword)
            .await
        {
            Ok(key) => {
                info!(key = %key, records = count, "Flushed batch");
                self.report.batches_flushed += 1;
                self.metrics.batches_flushed_total.inc();
                self.metrics.records_flushed_total.inc_by(count as u64);
            }
            Err(e) => {
                error!(error = %e, records = count, "Failed to flush batch, its records are lost");
                self.report.batches_failed += 1;
                self.report.records_lost += count;
                self.metrics.flush_failures_total.inc();
                self.metrics.record_dropped(DROP_REASON_FLUSH_FAILED, count);
            }
        }

        self.metrics
            .flush_time
            .observe(start.elapsed().as_secs_f64() * 1000.0);
        self.accumulator.clear();
    }

    async fn stop(&mut self) {
        if !self.accumulator.is_empty() {
            if self.flush_on_shutdown {
                info!(
                    records = self.accumulator.len(),
                    "Flushing the partial batch on shutdown"
                );
                self.flush().await;
            } else {
                let count = self.accumulator.len();
                warn!(
                    records = count,
                    "Stopping with a partial batch, its records are not archived"
                );
                self.report.records_unflushed = count;
                self.metrics.record_dropped(DROP_REASON_SHUTDOWN, count);
                self.accumulator.clear();
            }
        }
        self.metrics.queue_depth.set(0);
        self.state = PipelineState::Stopped;
    }

    /// Publishes the queue depth and warns once each time it crosses the high-water mark.
    fn watch_queue_depth(&mut self) {
        let depth = self.reader.len();
        self.metrics.queue_depth.set(depth as i64);
        if self.queue_high_water_mark == 0 {
            return;
        }

        if depth >= self.queue_high_water_mark {
            if !self.above_high_water_mark {
                warn!(
                    depth,
                    high_water_mark = self.queue_high_water_mark,
                    "Ingestion queue crossed its high-water mark"
                );
                self.above_high_water_mark = true;
            }
        } else if self.above_high_water_mark {
            info!(depth, "Ingestion queue back below its high-water mark");
            self.above_high_water_mark = false;
        }
    }
}
