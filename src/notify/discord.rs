// src/notify/discord.rs
use reqwest::Url;
use serde::Serialize;

use crate::classify::ClassifiedNotification;

pub const DEFAULT_TITLE: &str = "New ntfy message";
pub const EMPTY_BODY: &str = "*No content*";
/// Discord rejects embeds over these limits with a 400.
pub const MAX_TITLE_CHARS: usize = 256;
pub const MAX_DESCRIPTION_CHARS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub footer: EmbedFooter,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscordWebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(embed: DiscordEmbed) -> Self {
        Self {
            content: None,
            embeds: vec![embed],
        }
    }
}

/// Build the webhook body for a classified record. Pure: the same input
/// always produces the same payload.
pub fn render(n: &ClassifiedNotification) -> DiscordWebhookPayload {
    let emoji = n.severity.emoji();
    let raw_title = n.record.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let title = if raw_title.starts_with(emoji) {
        raw_title.to_string()
    } else {
        format!("{emoji} {raw_title}")
    };
    let description = n.record.body.as_deref().unwrap_or(EMPTY_BODY);

    DiscordWebhookPayload::embed(DiscordEmbed {
        title: truncate_chars(&title, MAX_TITLE_CHARS),
        description: truncate_chars(description, MAX_DESCRIPTION_CHARS),
        color: n.severity.color(),
        url: n.record.click.as_deref().and_then(valid_link),
        timestamp: n.record.timestamp.map(|t| t.to_rfc3339()),
        footer: EmbedFooter {
            text: format!("ntfy topic: {}", n.record.topic),
        },
    })
}

fn valid_link(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| raw.to_string())
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
