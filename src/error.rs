// src/error.rs
//! Error taxonomy for the bridging engine.
//!
//! Each stage owns its error type so the worker can decide locally what a
//! failure means: parse errors are skipped, stream errors drive reconnect
//! backoff, delivery errors are logged per record.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Invalid mapping fields. Raised when a mapping is created and again when a
/// worker builds its subscription URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field} URL `{value}`: {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("topic must be a non-empty single path segment, got `{0}`")]
    InvalidTopic(String),
}

/// A single stream line that could not be decoded into an event.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// Failure to open or keep reading a subscription stream.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    InvalidUrl(#[from] ConfigError),
    #[error("connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("source rejected subscription to {url} with {status} (check credentials/topic)")]
    Rejected { url: String, status: StatusCode },
    #[error("source unavailable at {url}: {status}")]
    Unavailable { url: String, status: StatusCode },
    #[error("stream read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
}

impl StreamError {
    /// True for failures that retrying soon will not fix: bad credentials,
    /// unknown topic, malformed URL.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::InvalidUrl(_))
    }
}

/// Final outcome of a failed delivery after the retry policy ran its course.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook transport error after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("webhook rejected payload with {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("webhook still rate limited after {attempts} attempt(s)")]
    RateLimited { attempts: u32 },
    #[error("webhook returned {status} after {attempts} attempt(s)")]
    ServerError { status: StatusCode, attempts: u32 },
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Short label used for the `outcome` metric dimension.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport_error",
            Self::Rejected { .. } => "rejected",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Mapping store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("mapping store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("mapping store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("mapping {0} not found")]
    NotFound(u64),
    #[error("mapping {server}/{topic} -> {webhook} already exists")]
    Duplicate {
        server: String,
        topic: String,
        webhook: String,
    },
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}
