// src/worker.rs
//! One subscription worker per mapping: connect, stream, classify, render,
//! deliver, and back off on failure until cancelled.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::classify::ClassifiedNotification;
use crate::config::ReconnectConfig;
use crate::error::{DeliveryError, StreamError};
use crate::mapping::Mapping;
use crate::notify::{render, DeliveryClient};
use crate::ntfy::{NotificationRecord, NotificationSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    Connecting,
    Streaming,
    Backoff,
    Stopped,
}

/// Collaborators shared by every worker. Cheap to clone.
#[derive(Clone)]
pub struct WorkerContext {
    pub source: Arc<dyn NotificationSource>,
    pub delivery: DeliveryClient,
    pub reconnect: ReconnectConfig,
}

enum CycleEnd {
    ConnectFailed(StreamError),
    Disconnected { open_for: Duration, reason: String },
}

/// Worker state. Owned by the worker task alone; the outside world only
/// sees the phase through a watch channel.
pub struct SubscriptionWorker {
    mapping: Mapping,
    ctx: WorkerContext,
    cancel: CancellationToken,
    phase: watch::Sender<WorkerPhase>,
    backoff: ReconnectBackoff,
    last_seen: Option<String>,
}

impl SubscriptionWorker {
    pub fn new(
        mapping: Mapping,
        ctx: WorkerContext,
        cancel: CancellationToken,
        phase: watch::Sender<WorkerPhase>,
    ) -> Self {
        let backoff = ctx.reconnect.backoff();
        Self {
            mapping,
            ctx,
            cancel,
            phase,
            backoff,
            last_seen: None,
        }
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.send_replace(phase);
    }

    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mapping_id = self.mapping.id;
        info!(mapping_id, topic = %self.mapping.source_topic, "worker started");

        loop {
            self.set_phase(WorkerPhase::Connecting);

            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind();
            let end = tokio::select! {
                _ = cancel.cancelled() => break,
                end = cycle => end,
            };

            let delay = match end {
                Ok(CycleEnd::ConnectFailed(err)) => {
                    if err.is_rejection() {
                        self.backoff.saturate();
                        error!(mapping_id, error = %err, "subscription rejected; retrying at the slowest rate");
                    } else {
                        warn!(mapping_id, error = %err, "ntfy connection failed");
                    }
                    self.backoff.next_delay()
                }
                Ok(CycleEnd::Disconnected { open_for, reason }) => {
                    if open_for >= self.ctx.reconnect.stable_after() {
                        self.backoff.reset();
                    }
                    warn!(
                        mapping_id,
                        open_for_ms = open_for.as_millis() as u64,
                        reason = %reason,
                        "ntfy stream disconnected"
                    );
                    self.backoff.next_delay()
                }
                Err(panic) => {
                    error!(mapping_id, panic = %panic_message(&*panic), "worker cycle panicked");
                    self.backoff.next_delay()
                }
            };

            self.set_phase(WorkerPhase::Backoff);
            debug!(mapping_id, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            counter!("bridge_reconnects_total").increment(1);
        }

        self.set_phase(WorkerPhase::Stopped);
        info!(mapping_id, "worker stopped");
    }

    async fn run_cycle(&mut self) -> CycleEnd {
        let mut stream = match self
            .ctx
            .source
            .subscribe(&self.mapping, self.last_seen.as_deref())
            .await
        {
            Ok(stream) => stream,
            Err(e) => return CycleEnd::ConnectFailed(e),
        };

        let opened = Instant::now();
        self.set_phase(WorkerPhase::Streaming);
        info!(
            mapping_id = self.mapping.id,
            server = %self.mapping.source_server_url,
            topic = %self.mapping.source_topic,
            auth = self.mapping.auth.display_kind(),
            "connected to ntfy stream"
        );

        let reason = loop {
            match stream.next_record().await {
                Ok(Some(record)) => self.handle_record(record).await,
                Ok(None) => break "closed by remote".to_string(),
                Err(e) => break e.to_string(),
            }
        };
        CycleEnd::Disconnected {
            open_for: opened.elapsed(),
            reason,
        }
    }

    async fn handle_record(&mut self, record: NotificationRecord) {
        let mapping_id = self.mapping.id;
        if self.last_seen.as_deref() == Some(record.id.as_str()) {
            debug!(mapping_id, record_id = %record.id, "skipping record already handled");
            return;
        }

        let record_id = record.id.clone();
        let classified = ClassifiedNotification::from(record);
        info!(
            mapping_id,
            record_id = %record_id,
            severity = classified.severity.as_str(),
            title = ?classified.record.title,
            "received message"
        );

        let payload = render(&classified);
        let result = self
            .ctx
            .delivery
            .deliver(&self.mapping.target_webhook_url, &payload, &self.cancel)
            .await;

        match result {
            Ok(attempts) => {
                counter!("bridge_deliveries_total", "outcome" => "delivered").increment(1);
                info!(mapping_id, record_id = %record_id, attempts, "sent message to Discord");
            }
            Err(DeliveryError::Cancelled) => return,
            Err(e @ DeliveryError::Rejected { .. }) => {
                counter!("bridge_deliveries_total", "outcome" => e.outcome()).increment(1);
                error!(
                    mapping_id,
                    record_id = %record_id,
                    error = %e,
                    "webhook rejected the message; check the webhook URL and its permissions"
                );
            }
            Err(e) => {
                counter!("bridge_deliveries_total", "outcome" => e.outcome()).increment(1);
                error!(mapping_id, record_id = %record_id, error = %e, "dropping message after failed delivery");
            }
        }
        self.last_seen = Some(record_id);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Supervisor-side handle to a running worker.
pub struct WorkerHandle {
    mapping: Mapping,
    cancel: CancellationToken,
    phase: watch::Receiver<WorkerPhase>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker whose cancellation is also triggered by `parent`.
    pub fn spawn(mapping: Mapping, ctx: WorkerContext, parent: &CancellationToken) -> Self {
        let cancel = parent.child_token();
        let (tx, rx) = watch::channel(WorkerPhase::Idle);
        let worker = SubscriptionWorker::new(mapping.clone(), ctx, cancel.clone(), tx);
        let join = tokio::spawn(worker.run());
        Self {
            mapping,
            cancel,
            phase: rx,
            join,
        }
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn phase(&self) -> WorkerPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<WorkerPhase> {
        self.phase.clone()
    }

    /// True once the task has exited, whether stopped or crashed.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel and wait up to `grace` for the worker to release its
    /// connection. Returns false when the task had to be aborted.
    pub async fn stop(self, grace: Duration) -> bool {
        self.cancel.cancel();
        let mut join = self.join;
        match tokio::time::timeout(grace, &mut join).await {
            Ok(_) => true,
            Err(_) => {
                join.abort();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkerPhase::Backoff).unwrap(),
            "\"backoff\""
        );
    }
}
