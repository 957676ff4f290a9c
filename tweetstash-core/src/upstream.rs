//! Client of the filtered search stream. Registers the keyword rule, then keeps a streaming
//! connection open and hands every delivered post to the [StreamProducer].

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::producer::{Delivery, StreamProducer};

pub use reconnect::ReconnectBackoff;

mod reconnect;

const RULES_PATH: &str = "/2/tweets/search/stream/rules";
const STREAM_PATH: &str = "/2/tweets/search/stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// The stream sends a keep-alive roughly every 20 seconds, a longer silence means the connection
/// is dead.
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct AddRules<'a> {
    add: [StreamRule<'a>; 1],
}

#[derive(Serialize)]
struct StreamRule<'a> {
    value: &'a str,
    tag: &'a str,
}

/// How one connection attempt ended.
enum Connection {
    /// Closed by the server or failed transiently, worth reconnecting.
    Lost,
    /// The producer asked to stop streaming.
    Disconnect,
    /// Shutdown was requested.
    Cancelled,
}

pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
    keyword: String,
    producer: StreamProducer,
    backoff: ReconnectBackoff,
    stall_timeout: Duration,
    rule_registered: bool,
}

impl StreamClient {
    pub fn new(
        base_url: impl Into<String>,
        bearer_token: impl Into<String>,
        keyword: impl Into<String>,
        producer: StreamProducer,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("tweetstash/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Upstream(format!("Failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
            keyword: keyword.into(),
            producer,
            backoff: ReconnectBackoff::default(),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            rule_registered: false,
        })
    }

    pub fn backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// How long the open stream may stay silent before the connection is considered lost.
    pub fn stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Streams until `cancel` is triggered or the producer disconnects. A disconnect (rate
    /// limiting or a closed queue) is returned as an [Error::Upstream].
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(keyword = %self.keyword, "Starting the stream");
        loop {
            // cancellation has to win over a handshake the server never answers
            let connection = tokio::select! {
                biased;
                _ = cancel.cancelled() => Connection::Cancelled,
                connection = self.connect_and_stream() => connection,
            };

            match connection {
                Connection::Cancelled => {
                    info!("Stream stopped on shutdown");
                    return Ok(());
                }
                Connection::Disconnect => {
                    return Err(Error::Upstream(
                        "stream disconnected, no new records will be accepted".to_string(),
                    ));
                }
                Connection::Lost => {}
            }

            let delay = self.backoff.next().unwrap_or_default();
            info!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to the stream"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_and_stream(&mut self) -> Connection {
        if !self.rule_registered {
            match self.add_rule().await {
                Ok(None) => self.rule_registered = true,
                Ok(Some(status)) => return self.rejected(status),
                Err(e) => {
                    warn!(error = %e, "Failed to register the stream rule");
                    return Connection::Lost;
                }
            }
        }

        let response = match self
            .http
            .get(format!("{}{STREAM_PATH}", self.base_url))
            .bearer_auth(&self.bearer_token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to connect to the stream");
                return Connection::Lost;
            }
        };

        let status = response.status();
        if !status.is_success() {
            return self.rejected(status.as_u16());
        }
        info!("Connected to the stream");
        self.backoff.reset();

        let mut buffer = BytesMut::new();
        let mut body = response.bytes_stream();
        loop {
            let Ok(chunk) = tokio::time::timeout(self.stall_timeout, body.next()).await else {
                warn!(
                    stall_timeout = ?self.stall_timeout,
                    "Stream went silent, reconnecting"
                );
                return Connection::Lost;
            };

            match chunk {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(line) = next_line(&mut buffer) {
                        if self.producer.on_data(line) == Delivery::Disconnect {
                            return Connection::Disconnect;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Stream read failed");
                    return Connection::Lost;
                }
                None => {
                    if !buffer.is_empty() {
                        debug!(bytes = buffer.len(), "Discarding incomplete line at end of stream");
                    }
                    warn!("Stream closed by the server");
                    return Connection::Lost;
                }
            }
        }
    }

    fn rejected(&self, status: u16) -> Connection {
        match self.producer.on_error(status) {
            Delivery::Disconnect => Connection::Disconnect,
            Delivery::Continue => Connection::Lost,
        }
    }

    /// Registers the keyword as a filter rule. Returns the status code if it was rejected.
    async fn add_rule(&self) -> Result<Option<u16>> {
        let body = AddRules {
            add: [StreamRule {
                value: &self.keyword,
                tag: &self.keyword,
            }],
        };
        let response = self
            .http
            .post(format!("{}{RULES_PATH}", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("Adding stream rule: {e}")))?;

        let status = response.status();
        if status.is_success() {
            info!(keyword = %self.keyword, "Registered stream rule");
            Ok(None)
        } else {
            Ok(Some(status.as_u16()))
        }
    }
}

/// Splits the next complete line off the buffer, skipping blank keep-alive lines. The line is
/// returned without its terminator.
fn next_line(buffer: &mut BytesMut) -> Option<Bytes> {
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let mut line = buffer.split_to(pos + 1);
        line.truncate(pos);
        if line.last() == Some(&b'\r') {
            line.truncate(pos - 1);
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            return Some(line.freeze());
        }
    }
    None
}
