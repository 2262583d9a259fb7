// src/classify.rs
//! Severity classification of ntfy records from their tags and priority.

use std::collections::BTreeSet;

use crate::ntfy::{NotificationRecord, Priority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Discord embed color (decimal RGB).
    pub fn color(self) -> u32 {
        match self {
            Severity::Info => 0x3498DB,
            Severity::Success => 0x2ECC71,
            Severity::Warning => 0xFFFF00,
            Severity::Error => 0xE74C3C,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Success => "✅",
            Severity::Warning => "⚠️",
            Severity::Error => "❌",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

pub const ERROR_TAGS: &[&str] = &["error", "skull", "rotating_light", "fire", "boom"];
pub const SUCCESS_TAGS: &[&str] = &[
    "white_check_mark",
    "heavy_check_mark",
    "partying_face",
    "tada",
    "check",
];
pub const WARNING_TAGS: &[&str] = &["warning", "exclamation", "construction"];

fn has_any(tags: &BTreeSet<String>, set: &[&str]) -> bool {
    tags.iter().any(|t| set.iter().any(|s| t.eq_ignore_ascii_case(s)))
}

/// First match wins: error tags, success tags, warning tags, then priority.
pub fn classify(priority: Option<Priority>, tags: &BTreeSet<String>) -> Severity {
    if has_any(tags, ERROR_TAGS) {
        return Severity::Error;
    }
    if has_any(tags, SUCCESS_TAGS) {
        return Severity::Success;
    }
    if has_any(tags, WARNING_TAGS) {
        return Severity::Warning;
    }
    match priority {
        Some(Priority::Urgent) => Severity::Error,
        Some(Priority::High) => Severity::Warning,
        _ => Severity::Info,
    }
}

/// A record together with its derived severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedNotification {
    pub record: NotificationRecord,
    pub severity: Severity,
}

impl From<NotificationRecord> for ClassifiedNotification {
    fn from(record: NotificationRecord) -> Self {
        let severity = classify(record.priority, &record.tags);
        Self { record, severity }
    }
}
