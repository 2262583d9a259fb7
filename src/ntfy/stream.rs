// src/ntfy/stream.rs
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use metrics::counter;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tokio_util::io::StreamReader;

use super::record::{parse_line, NotificationRecord, SourceEvent};
use super::NotificationSource;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::mapping::Mapping;

/// ntfy caps message bodies at 4 KiB; anything past this is not a record.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Decodes an NDJSON subscription body into notification records.
///
/// Malformed, non-UTF-8 and oversized lines and control events never end the
/// sequence; only the underlying reader can (EOF, read error, idle timeout).
pub struct RecordStream {
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    buf: Vec<u8>,
    idle_timeout: Duration,
    topic: String,
    /// Inside an oversized line; drop bytes up to the next newline.
    discarding: bool,
}

impl RecordStream {
    pub fn new<R>(reader: R, idle_timeout: Duration) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            buf: Vec::with_capacity(1024),
            idle_timeout,
            topic: String::new(),
            discarding: false,
        }
    }

    /// Topic name used in log lines.
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    /// Next `message` record. `Ok(None)` means the remote end closed the stream.
    pub async fn next_record(&mut self) -> Result<Option<NotificationRecord>, StreamError> {
        loop {
            self.buf.clear();
            let mut limited = (&mut self.reader).take(MAX_LINE_BYTES as u64 + 1);
            let read =
                tokio::time::timeout(self.idle_timeout, limited.read_until(b'\n', &mut self.buf))
                    .await;
            match read {
                Err(_) => return Err(StreamError::IdleTimeout(self.idle_timeout)),
                Ok(Err(e)) => return Err(StreamError::Read(e)),
                Ok(Ok(0)) => return Ok(None),
                Ok(Ok(_)) => {}
            }

            let complete = self.buf.last() == Some(&b'\n');
            if self.discarding {
                self.discarding = !complete;
                continue;
            }
            if !complete && self.buf.len() > MAX_LINE_BYTES {
                self.discarding = true;
                counter!("bridge_parse_errors_total").increment(1);
                tracing::warn!(
                    topic = %self.topic,
                    limit = MAX_LINE_BYTES,
                    "skipping oversized line from ntfy stream"
                );
                continue;
            }

            let Ok(text) = std::str::from_utf8(&self.buf) else {
                counter!("bridge_parse_errors_total").increment(1);
                tracing::warn!(topic = %self.topic, "skipping non-UTF-8 line from ntfy stream");
                continue;
            };
            let line = text.trim();
            if line.is_empty() {
                continue;
            }

            match parse_line(line) {
                Ok(SourceEvent::Message(record)) => {
                    counter!("bridge_records_received_total").increment(1);
                    return Ok(Some(record));
                }
                Ok(SourceEvent::Other(kind)) => {
                    tracing::debug!(topic = %self.topic, event = %kind, "ignoring unknown event");
                }
                Ok(_) => {}
                Err(e) => {
                    counter!("bridge_parse_errors_total").increment(1);
                    tracing::warn!(
                        topic = %self.topic,
                        error = %e,
                        line = %truncate(line, 200),
                        "skipping invalid line from ntfy stream"
                    );
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// HTTP subscriber for ntfy's `/<topic>/json` endpoint.
#[derive(Clone)]
pub struct NtfyClient {
    client: Client,
    idle_timeout: Duration,
}

impl NtfyClient {
    /// No overall request timeout: the subscription is meant to stay open.
    /// Liveness is enforced per line by the idle timeout instead.
    pub fn new(cfg: &StreamConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
        })
    }
}

#[async_trait]
impl NotificationSource for NtfyClient {
    async fn subscribe(
        &self,
        mapping: &Mapping,
        since: Option<&str>,
    ) -> Result<RecordStream, StreamError> {
        let mut url = mapping.subscribe_url()?;
        if let Some(id) = since {
            url.query_pairs_mut().append_pair("since", id);
        }

        let mut req = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/x-ndjson, application/json");
        if let Some(value) = mapping.auth.header_value() {
            req = req.header(AUTHORIZATION, value);
        }

        let resp = req.send().await.map_err(|source| StreamError::Connect {
            url: url.to_string(),
            source,
        })?;

        let status = resp.status();
        if status.is_client_error() {
            return Err(StreamError::Rejected {
                url: url.to_string(),
                status,
            });
        }
        if !status.is_success() {
            return Err(StreamError::Unavailable {
                url: url.to_string(),
                status,
            });
        }

        let body = resp.bytes_stream().map_err(std::io::Error::other);
        let reader = StreamReader::new(Box::pin(body));
        Ok(RecordStream::new(reader, self.idle_timeout).with_topic(&mapping.source_topic))
    }
}
