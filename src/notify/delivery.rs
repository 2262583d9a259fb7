// src/notify/delivery.rs
use std::time::Duration;

use metrics::counter;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use super::discord::DiscordWebhookPayload;
use crate::backoff::RetryPolicy;
use crate::config::DeliveryConfig;
use crate::error::DeliveryError;

/// POSTs rendered payloads to Discord webhooks.
///
/// Transport errors, 5xx and 429 are retried per the [`RetryPolicy`]; any
/// other non-2xx is returned immediately as [`DeliveryError::Rejected`].
#[derive(Clone)]
pub struct DeliveryClient {
    client: Client,
    timeout: Duration,
    policy: RetryPolicy,
    max_retry_after: Duration,
}

impl Default for DeliveryClient {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl DeliveryClient {
    pub fn from_config(cfg: &DeliveryConfig) -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            policy: cfg.retry_policy(),
            max_retry_after: Duration::from_secs(cfg.max_retry_after_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_retry_after(mut self, max: Duration) -> Self {
        self.max_retry_after = max;
        self
    }

    /// Deliver one payload. Returns the number of attempts it took.
    pub async fn deliver(
        &self,
        webhook: &str,
        payload: &DiscordWebhookPayload,
        cancel: &CancellationToken,
    ) -> Result<u32, DeliveryError> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DeliveryError::Cancelled);
            }
            attempt = attempt.saturating_add(1);
            counter!("bridge_delivery_attempts_total").increment(1);

            let res = self
                .client
                .post(webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let mut retry_after = None;
            let failure = match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        return Ok(attempt);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        retry_after = parse_retry_after(rsp.headers());
                        DeliveryError::RateLimited { attempts: attempt }
                    } else if status.is_server_error() {
                        DeliveryError::ServerError {
                            status,
                            attempts: attempt,
                        }
                    } else {
                        let body = rsp.text().await.unwrap_or_default();
                        return Err(DeliveryError::Rejected {
                            status,
                            body: body.chars().take(300).collect(),
                        });
                    }
                }
                // A URL reqwest cannot even build a request for will never succeed.
                Err(e) if e.is_builder() => {
                    return Err(DeliveryError::Transport {
                        attempts: attempt,
                        source: e,
                    })
                }
                Err(e) => DeliveryError::Transport {
                    attempts: attempt,
                    source: e,
                },
            };

            if attempt > self.policy.max_retries {
                return Err(failure);
            }

            let delay = match retry_after {
                Some(hint) => hint.min(self.max_retry_after),
                None => self.policy.delay_for_attempt(attempt - 1),
            };
            tracing::warn!(
                attempt,
                max = self.policy.max_retries.saturating_add(1),
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "webhook delivery failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Discord sends `Retry-After` (seconds, possibly fractional) and
/// `X-RateLimit-Reset-After` on 429 responses.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["retry-after", "x-ratelimit-reset-after"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .filter_map(|s| s.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && (0.0..1e9).contains(secs))
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_prefers_standard_header() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", HeaderValue::from_static("2"));
        h.insert("x-ratelimit-reset-after", HeaderValue::from_static("9"));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_secs(2)));
    }

    #[test]
    fn retry_after_falls_back_and_accepts_fractions() {
        let mut h = HeaderMap::new();
        h.insert("x-ratelimit-reset-after", HeaderValue::from_static("0.25"));
        assert_eq!(parse_retry_after(&h), Some(Duration::from_millis(250)));
    }

    #[test]
    fn retry_after_ignores_garbage() {
        let mut h = HeaderMap::new();
        h.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&h), None);
        h.insert("retry-after", HeaderValue::from_static("-3"));
        assert_eq!(parse_retry_after(&h), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_sending() {
        let client = DeliveryClient::default();
        let token = CancellationToken::new();
        token.cancel();
        let payload = DiscordWebhookPayload {
            content: None,
            embeds: vec![],
        };
        let res = client
            .deliver("http://127.0.0.1:9/unused", &payload, &token)
            .await;
        assert!(matches!(res, Err(DeliveryError::Cancelled)));
    }
}
