// src/mapping/mod.rs
pub mod store;

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use store::{JsonFileStore, MappingStore, MemoryStore};

/// How the subscriber authenticates against the ntfy server.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    #[default]
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

impl Auth {
    /// Value for the `Authorization` header, if any.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Auth::None => None,
            Auth::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                Some(format!("Basic {encoded}"))
            }
            Auth::Bearer { token } => Some(format!("Bearer {token}")),
        }
    }

    /// Human-readable kind that never reveals credentials.
    pub fn display_kind(&self) -> &'static str {
        match self {
            Auth::None => "None",
            Auth::Basic { .. } => "Basic (user/pass)",
            Auth::Bearer { .. } => "Bearer token",
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::None => f.write_str("None"),
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Auth::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Operator-configured binding of one ntfy topic to one Discord webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: u64,
    pub source_server_url: String,
    pub source_topic: String,
    pub target_webhook_url: String,
    #[serde(default)]
    pub auth: Auth,
}

/// A mapping that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMapping {
    pub source_server_url: String,
    pub source_topic: String,
    pub target_webhook_url: String,
    #[serde(default)]
    pub auth: Auth,
}

impl NewMapping {
    /// Trim whitespace and stray slashes, then check the fields are usable.
    pub fn normalized(self) -> Result<Self, ConfigError> {
        let source_server_url = self.source_server_url.trim().trim_end_matches('/').to_string();
        let source_topic = self.source_topic.trim().trim_matches('/').to_string();
        let target_webhook_url = self.target_webhook_url.trim().to_string();

        parse_http_url("server", &source_server_url)?;
        parse_http_url("webhook", &target_webhook_url)?;
        validate_topic(&source_topic)?;

        Ok(Self {
            source_server_url,
            source_topic,
            target_webhook_url,
            auth: self.auth,
        })
    }

    pub fn with_id(self, id: u64) -> Mapping {
        Mapping {
            id,
            source_server_url: self.source_server_url,
            source_topic: self.source_topic,
            target_webhook_url: self.target_webhook_url,
            auth: self.auth,
        }
    }
}

impl Mapping {
    /// `{server}/{topic}/json`, the ntfy NDJSON subscription endpoint.
    pub fn subscribe_url(&self) -> Result<Url, ConfigError> {
        validate_topic(self.source_topic.trim_matches('/'))?;
        let raw = format!(
            "{}/{}/json",
            self.source_server_url.trim_end_matches('/'),
            self.source_topic.trim_matches('/')
        );
        parse_http_url("server", &raw)
    }

    /// Webhook URL shortened for tables and logs; webhook tokens are secrets.
    pub fn webhook_display(&self) -> String {
        shorten(&self.target_webhook_url, 30)
    }

    /// True when both mappings subscribe to the same server/topic pair.
    pub fn same_source(&self, other: &NewMapping) -> bool {
        self.source_server_url == other.source_server_url
            && self.source_topic == other.source_topic
    }
}

fn parse_http_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme `{other}`"))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() || topic.contains('/') || topic.chars().any(char::is_whitespace) {
        return Err(ConfigError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    format!("{head}...")
}
