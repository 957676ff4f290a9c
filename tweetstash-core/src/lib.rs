//! Archives a keyword-filtered stream of social-media posts into object storage.
//!
//! The upstream client delivers raw posts into an unbounded ingestion queue. A single pipeline
//! coordinator tags every post with the keyword, groups posts into fixed-size batches and writes
//! each full batch as newline delimited JSON under
//! `<keyword>/<year>/<month>/<day>/<hour>/<minute>/tweets_<timestamp>.json`.
//!
//! Delivery is at-most-once: a batch whose write fails is dropped, and so is the partial batch
//! left at shutdown unless `flush_on_shutdown` is set.

use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use crate::error::{Error, Result};

mod error;

pub mod archive;
mod batch;
pub mod config;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod producer;
pub mod queue;
pub mod upstream;

use crate::archive::{Archiver, LocalStore, S3Store, Store};
use crate::config::{Destination, Settings};
use crate::metrics::PipelineMetrics;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::producer::StreamProducer;
use crate::queue::ingestion_queue;
use crate::upstream::StreamClient;

/// Runs the stream and the pipeline until the run duration elapses or `cancel` is triggered.
/// New data stops being accepted first, then the pipeline drains the queue and stops.
pub async fn run(settings: Settings, cancel: CancellationToken) -> Result<PipelineReport> {
    info!(?settings, "Starting tweetstash");

    std::fs::create_dir_all(&settings.staging_dir).map_err(|e| {
        Error::Config(format!(
            "Failed to create staging directory {}: {e}",
            settings.staging_dir.display()
        ))
    })?;
    let store = build_store(&settings).await?;

    let metrics = PipelineMetrics::new();
    let (writer, reader) = ingestion_queue();

    let client = StreamClient::new(
        &settings.stream_url,
        &settings.bearer_token,
        &settings.keyword,
        StreamProducer::new(writer, metrics.clone()),
    )?;

    let archiver = Archiver::new(store, &settings.staging_dir).unique_keys(settings.unique_keys);
    let pipeline = Pipeline::new(
        reader,
        archiver,
        &settings.keyword,
        settings.batch_size,
        metrics.clone(),
    )
    .flush_on_shutdown(settings.flush_on_shutdown)
    .queue_high_water_mark(settings.queue_high_water_mark);

    let pipeline_shutdown = CancellationToken::new();
    let pipeline_handle = tokio::spawn(pipeline.run(pipeline_shutdown.clone()));

    let stream_cancel = CancellationToken::new();
    let stream_handle = tokio::spawn(client.run(stream_cancel.clone()));

    let metrics_cancel = CancellationToken::new();
    let metrics_handle = settings.metrics_port.map(|port| {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let metrics_cancel = metrics_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(addr, metrics, metrics_cancel).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    });

    tokio::select! {
        _ = tokio::time::sleep(settings.run_duration) => {
            info!(run_duration = ?settings.run_duration, "Run duration elapsed, shutting down");
        }
        _ = cancel.cancelled() => info!("Shutdown requested"),
    }

    stream_cancel.cancel();
    match stream_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Stream ended before shutdown"),
        Err(e) => error!(error = %e, "Stream task failed"),
    }

    pipeline_shutdown.cancel();
    let report = pipeline_handle
        .await
        .map_err(|e| Error::Pipeline(format!("Pipeline task failed: {e}")))?;

    metrics_cancel.cancel();
    if let Some(handle) = metrics_handle
        && let Err(e) = handle.await
    {
        error!(error = %e, "Metrics server task failed");
    }

    Ok(report)
}

async fn build_store(settings: &Settings) -> Result<Store> {
    match &settings.destination {
        Destination::S3 { bucket } => Ok(Store::S3(S3Store::connect(bucket, &settings.aws).await)),
        Destination::Local { root } => Ok(Store::Local(LocalStore::new(root)?)),
    }
}
