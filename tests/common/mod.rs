// tests/common/mod.rs
//! In-process fakes shared by the integration tests: an ntfy server, a
//! Discord webhook, and scripted `NotificationSource`s.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::io::StreamReader;

use ntfy_discord_bridge::config::ReconnectConfig;
use ntfy_discord_bridge::error::StreamError;
use ntfy_discord_bridge::notify::DeliveryClient;
use ntfy_discord_bridge::ntfy::{NotificationSource, RecordStream};
use ntfy_discord_bridge::{Auth, Mapping, WorkerContext};

/// Serve `app` on an ephemeral localhost port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

/// Accepts TCP connections and never answers. Returns the URL and a counter
/// of accepted connections.
pub async fn unresponsive_server() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((sock, _)) = listener.accept().await {
            held.push(sock);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    (format!("http://{addr}/api/webhooks/2/slow"), hits)
}

pub fn mapping(id: u64, server: &str, topic: &str, webhook: &str) -> Mapping {
    Mapping {
        id,
        source_server_url: server.to_string(),
        source_topic: topic.to_string(),
        target_webhook_url: webhook.to_string(),
        auth: Auth::None,
    }
}

/// Poll `cond` every 10ms until it holds or `limit` passes.
pub async fn wait_until<F: Fn() -> bool>(limit: Duration, cond: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

// ---------------------------------------------------------------------------
// Fake Discord webhook
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDiscord {
    /// Status and optional Retry-After per request; 204 once exhausted.
    script: Mutex<VecDeque<(u16, Option<&'static str>)>>,
    received: Mutex<Vec<Value>>,
}

impl FakeDiscord {
    pub fn scripted(responses: &[(u16, Option<&'static str>)]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.iter().copied().collect()),
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// Start the server; returns the webhook URL.
    pub async fn start(self: &Arc<Self>) -> String {
        let app = Router::new()
            .route("/api/webhooks/{id}/{token}", post(discord_webhook))
            .with_state(self.clone());
        format!("{}/api/webhooks/1/secret-token", serve(app).await)
    }
}

async fn discord_webhook(
    State(fake): State<Arc<FakeDiscord>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    fake.received.lock().unwrap().push(body);
    let (code, retry_after) = fake.script.lock().unwrap().pop_front().unwrap_or((204, None));
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut headers = HeaderMap::new();
    if let Some(v) = retry_after {
        headers.insert("retry-after", v.parse().unwrap());
    }
    (status, headers, "")
}

// ---------------------------------------------------------------------------
// Fake ntfy server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SeenSubscribe {
    pub topic: String,
    pub since: Option<String>,
    pub authorization: Option<String>,
}

/// Answers every `/{topic}/json` request with `status` and the same NDJSON
/// body, then closes the stream.
pub struct FakeNtfy {
    status: u16,
    body: String,
    seen: Mutex<Vec<SeenSubscribe>>,
}

impl FakeNtfy {
    pub fn new(status: u16, lines: &[&str]) -> Arc<Self> {
        let mut body = lines.join("\n");
        body.push('\n');
        Arc::new(Self {
            status,
            body,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<SeenSubscribe> {
        self.seen.lock().unwrap().clone()
    }

    /// Start the server; returns its base URL.
    pub async fn start(self: &Arc<Self>) -> String {
        let app = Router::new()
            .route("/{topic}/json", get(ntfy_subscribe))
            .with_state(self.clone());
        serve(app).await
    }
}

async fn ntfy_subscribe(
    State(fake): State<Arc<FakeNtfy>>,
    Path(topic): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    fake.seen.lock().unwrap().push(SeenSubscribe {
        topic,
        since: query.get("since").cloned(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });
    let status = StatusCode::from_u16(fake.status).unwrap_or(StatusCode::OK);
    (status, fake.body.clone())
}

// ---------------------------------------------------------------------------
// Scripted sources (no network)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Connection refused with 503.
    Fail,
    /// Connection refused with 401.
    Reject,
    /// Connected, but nothing arrives until the idle timeout fires.
    Idle(Duration),
    Panic,
}

/// Plays `steps` in order, then repeats the last one. Records the instant of
/// every subscribe call per mapping id.
pub struct ScriptedSource {
    steps: Vec<Step>,
    calls: Mutex<HashMap<u64, Vec<Instant>>>,
}

impl ScriptedSource {
    pub fn new(steps: &[Step]) -> Arc<Self> {
        Arc::new(Self {
            steps: steps.to_vec(),
            calls: Mutex::new(HashMap::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::new(&[Step::Fail])
    }

    pub fn calls(&self, mapping_id: u64) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .get(&mapping_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn call_count(&self, mapping_id: u64) -> usize {
        self.calls(mapping_id).len()
    }
}

#[async_trait]
impl NotificationSource for ScriptedSource {
    async fn subscribe(
        &self,
        mapping: &Mapping,
        _since: Option<&str>,
    ) -> Result<RecordStream, StreamError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(mapping.id).or_default();
            entry.push(Instant::now());
            entry.len()
        };
        let step = self
            .steps
            .get(n - 1)
            .or_else(|| self.steps.last())
            .copied()
            .unwrap_or(Step::Fail);

        let url = format!("{}/{}/json", mapping.source_server_url, mapping.source_topic);
        match step {
            Step::Fail => Err(StreamError::Unavailable {
                url,
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            }),
            Step::Reject => Err(StreamError::Rejected {
                url,
                status: reqwest::StatusCode::UNAUTHORIZED,
            }),
            Step::Idle(idle) => {
                let silent = futures::stream::pending::<Result<&'static [u8], std::io::Error>>();
                Ok(RecordStream::new(StreamReader::new(silent), idle))
            }
            Step::Panic => panic!("scripted source panic"),
        }
    }
}

pub fn context(source: Arc<dyn NotificationSource>, min_ms: u64, max_ms: u64) -> WorkerContext {
    WorkerContext {
        source,
        delivery: DeliveryClient::default(),
        reconnect: ReconnectConfig {
            min_delay_ms: min_ms,
            max_delay_ms: max_ms,
            stable_after_secs: 60,
        },
    }
}
