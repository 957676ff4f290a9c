//! Prometheus metrics of one pipeline instance. Every pipeline owns its registry, so several
//! pipelines (and tests) can run in the same process without sharing counters.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

const REGISTRY_PREFIX: &str = "tweetstash";

const RECEIVED_TOTAL: &str = "records_received";
const ENQUEUE_FAILURES_TOTAL: &str = "enqueue_failures";
const PROCESSED_TOTAL: &str = "records_processed";
const SKIPPED_TOTAL: &str = "records_skipped";
const BATCHES_FLUSHED_TOTAL: &str = "batches_flushed";
const RECORDS_FLUSHED_TOTAL: &str = "records_flushed";
const FLUSH_FAILURES_TOTAL: &str = "flush_failures";
const DROPPED_TOTAL: &str = "records_dropped";
const QUEUE_DEPTH: &str = "queue_depth";
const FLUSH_TIME: &str = "flush_time_milliseconds";

const REASON_LABEL: &str = "reason";
pub(crate) const DROP_REASON_FLUSH_FAILED: &str = "flush_failed";
pub(crate) const DROP_REASON_SHUTDOWN: &str = "unflushed_at_shutdown";

/// Counters and gauges shared by the stream producer and the pipeline coordinator. Clones share
/// the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub(crate) received_total: Counter,
    pub(crate) enqueue_failures_total: Counter,
    pub(crate) processed_total: Counter,
    pub(crate) skipped_total: Counter,
    pub(crate) batches_flushed_total: Counter,
    pub(crate) records_flushed_total: Counter,
    pub(crate) flush_failures_total: Counter,
    pub(crate) dropped_total: Family<Vec<(String, String)>, Counter>,
    pub(crate) queue_depth: Gauge,
    pub(crate) flush_time: Histogram,
    registry: Arc<Mutex<Registry>>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let metrics = Self {
            received_total: Counter::default(),
            enqueue_failures_total: Counter::default(),
            processed_total: Counter::default(),
            skipped_total: Counter::default(),
            batches_flushed_total: Counter::default(),
            records_flushed_total: Counter::default(),
            flush_failures_total: Counter::default(),
            dropped_total: Family::<Vec<(String, String)>, Counter>::default(),
            queue_depth: Gauge::default(),
            // 1ms up to ~32s
            flush_time: Histogram::new(exponential_buckets(1.0, 2.0, 16)),
            registry: Arc::new(Mutex::new(Registry::default())),
        };

        {
            let mut registry = metrics.registry.lock();
            let registry = registry.sub_registry_with_prefix(REGISTRY_PREFIX);
            registry.register(
                RECEIVED_TOTAL,
                "A Counter to keep track of the records delivered by the upstream stream",
                metrics.received_total.clone(),
            );
            registry.register(
                ENQUEUE_FAILURES_TOTAL,
                "A Counter to keep track of the records that could not be enqueued",
                metrics.enqueue_failures_total.clone(),
            );
            registry.register(
                PROCESSED_TOTAL,
                "A Counter to keep track of the records appended to a batch",
                metrics.processed_total.clone(),
            );
            registry.register(
                SKIPPED_TOTAL,
                "A Counter to keep track of the records skipped because they could not be parsed or batched",
                metrics.skipped_total.clone(),
            );
            registry.register(
                BATCHES_FLUSHED_TOTAL,
                "A Counter to keep track of the batches written to the archive",
                metrics.batches_flushed_total.clone(),
            );
            registry.register(
                RECORDS_FLUSHED_TOTAL,
                "A Counter to keep track of the records written to the archive",
                metrics.records_flushed_total.clone(),
            );
            registry.register(
                FLUSH_FAILURES_TOTAL,
                "A Counter to keep track of the failed batch flushes",
                metrics.flush_failures_total.clone(),
            );
            registry.register(
                DROPPED_TOTAL,
                "A Counter to keep track of the records that never reached the archive",
                metrics.dropped_total.clone(),
            );
            registry.register(
                QUEUE_DEPTH,
                "A Gauge to keep track of the records waiting in the ingestion queue",
                metrics.queue_depth.clone(),
            );
            registry.register(
                FLUSH_TIME,
                "A Histogram to keep track of the time taken to stage and write a batch, in milliseconds",
                metrics.flush_time.clone(),
            );
        }

        metrics
    }

    pub(crate) fn record_dropped(&self, reason: &str, count: usize) {
        self.dropped_total
            .get_or_create(&vec![(REASON_LABEL.to_string(), reason.to_string())])
            .inc_by(count as u64);
    }

    /// Renders the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String> {
        let registry = self.registry.lock();
        let mut buffer = String::new();
        encode(&mut buffer, &registry)
            .map_err(|e| Error::Metrics(format!("Encoding metrics: {e}")))?;
        Ok(buffer)
    }
}

async fn metrics_handler(State(metrics): State<PipelineMetrics>) -> Response {
    match metrics.encode() {
        Ok(buffer) => {
            debug!("Exposing metrics: {:?}", buffer);
            (
                [(
                    header::CONTENT_TYPE,
                    "application/openmetrics-text; version=1.0.0; charset=utf-8",
                )],
                Body::from(buffer),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn livez() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// router for metrics and health endpoints
pub fn metrics_router(metrics: PipelineMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/livez", get(livez))
        .with_state(metrics)
}

/// Serves the metrics router until `cancel` is triggered.
pub async fn start_metrics_server(
    addr: SocketAddr,
    metrics: PipelineMetrics,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Metrics(format!("Binding metrics server to {addr}: {e}")))?;
    info!(addr = %addr, "Started metrics server");

    axum::serve(listener, metrics_router(metrics))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| Error::Metrics(format!("Running metrics server: {e}")))
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = PipelineMetrics::new();
        metrics.processed_total.inc_by(25);
        metrics.batches_flushed_total.inc_by(2);
        metrics.queue_depth.set(3);
        metrics.record_dropped(DROP_REASON_SHUTDOWN, 5);

        let (status, body) = get_body(metrics_router(metrics), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("tweetstash_records_processed_total 25"));
        assert!(body.contains("tweetstash_batches_flushed_total 2"));
        assert!(body.contains("tweetstash_queue_depth 3"));
        assert!(
            body.contains("tweetstash_records_dropped_total{reason=\"unflushed_at_shutdown\"} 5")
        );
        assert!(body.ends_with("# EOF\n"));
    }

    #[tokio::test]
    async fn test_livez() {
        let (status, body) = get_body(metrics_router(PipelineMetrics::new()), "/livez").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_instances_do_not_share_counters() {
        let first = PipelineMetrics::new();
        let second = PipelineMetrics::new();
        first.received_total.inc();

        assert!(first.encode().unwrap().contains("tweetstash_records_received_total 1"));
        assert!(second.encode().unwrap().contains("tweetstash_records_received_total 0"));
    }

    #[tokio::test]
    async fn test_metrics_server_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let server = tokio::spawn(start_metrics_server(
            "127.0.0.1:0".parse().unwrap(),
            PipelineMetrics::new(),
            cancel.clone(),
        ));
        cancel.cancel();
        assert!(server.await.unwrap().is_ok());
    }
}
