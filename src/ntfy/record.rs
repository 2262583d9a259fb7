// src/ntfy/record.rs
//! ntfy NDJSON line schema and the typed events decoded from it.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::ParseError;

/// ntfy message priority, 1 (min) to 5 (urgent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Min = 1,
    Low = 2,
    Default = 3,
    High = 4,
    Urgent = 5,
}

impl Priority {
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::Min),
            2 => Some(Self::Low),
            3 => Some(Self::Default),
            4 => Some(Self::High),
            5 => Some(Self::Urgent),
            _ => None,
        }
    }

    /// Accepts ntfy's priority names and their numeric spellings.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "min" | "minimal" | "1" => Some(Self::Min),
            "low" | "2" => Some(Self::Low),
            "default" | "3" => Some(Self::Default),
            "high" | "4" => Some(Self::High),
            "urgent" | "max" | "5" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// One inbound `message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub id: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub topic: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub priority: Option<Priority>,
    /// Lower-cased.
    pub tags: BTreeSet<String>,
    pub click: Option<String>,
}

/// Everything a subscription stream can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Open,
    Keepalive,
    PollRequest,
    Message(NotificationRecord),
    /// `message` event without title or body.
    Empty,
    Other(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPriority {
    Number(i64),
    Label(String),
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    priority: Option<RawPriority>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    click: Option<String>,
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// Decode one stream line. Lines without the `event`/`topic` discriminators
/// are errors; unknown event kinds are not.
pub fn parse_line(line: &str) -> Result<SourceEvent, ParseError> {
    let raw: RawEvent = serde_json::from_str(line)?;

    let event = raw.event.ok_or(ParseError::MissingField("event"))?;
    let topic = raw.topic.ok_or(ParseError::MissingField("topic"))?;

    match event.as_str() {
        "open" => return Ok(SourceEvent::Open),
        "keepalive" => return Ok(SourceEvent::Keepalive),
        "poll_request" => return Ok(SourceEvent::PollRequest),
        "message" => {}
        _ => return Ok(SourceEvent::Other(event)),
    }

    let id = raw.id.ok_or(ParseError::MissingField("id"))?;
    let title = non_blank(raw.title);
    let body = non_blank(raw.message).or_else(|| non_blank(raw.body));
    if title.is_none() && body.is_none() {
        return Ok(SourceEvent::Empty);
    }

    let priority = match raw.priority {
        Some(RawPriority::Number(n)) => Priority::from_number(n),
        Some(RawPriority::Label(s)) => Priority::from_label(&s),
        None => None,
    };
    let tags = raw
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    let timestamp = raw
        .time
        .or(raw.timestamp)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    Ok(SourceEvent::Message(NotificationRecord {
        id,
        timestamp,
        topic,
        title,
        body,
        priority,
        tags,
        click: non_blank(raw.click),
    }))
}
