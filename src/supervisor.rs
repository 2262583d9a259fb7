// src/supervisor.rs
//! Keeps the set of running workers equal to the set of stored mappings.
//!
//! Other contexts never touch the worker map. They send commands through a
//! [`SupervisorHandle`]; the supervisor task applies them one at a time.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::gauge;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::mapping::{Mapping, MappingStore};
use crate::worker::{WorkerContext, WorkerHandle, WorkerPhase};

#[derive(Debug)]
pub enum SupervisorCommand {
    Reconcile {
        reply: oneshot::Sender<ReconcileReport>,
    },
    Status {
        reply: oneshot::Sender<Vec<WorkerStatus>>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: usize,
    pub stopped: usize,
    pub restarted: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub mapping_id: u64,
    pub server: String,
    pub topic: String,
    pub phase: WorkerPhase,
}

/// Cloneable command sender for the supervisor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Reconcile now and wait for the result. `None` if the supervisor is gone.
    pub async fn reconcile(&self) -> Option<ReconcileReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::Reconcile { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn status(&self) -> Vec<WorkerStatus> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SupervisorCommand::Status { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

pub struct Supervisor {
    store: Arc<dyn MappingStore>,
    ctx: WorkerContext,
    workers: HashMap<u64, WorkerHandle>,
    interval: Duration,
    grace: Duration,
    root: CancellationToken,
    rx: mpsc::Receiver<SupervisorCommand>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn MappingStore>,
        ctx: WorkerContext,
        interval: Duration,
        grace: Duration,
    ) -> (Self, SupervisorHandle) {
        let (tx, rx) = mpsc::channel(16);
        let sup = Self {
            store,
            ctx,
            workers: HashMap::new(),
            interval,
            grace,
            root: CancellationToken::new(),
            rx,
        };
        (sup, SupervisorHandle { tx })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Phase receiver for one worker, if it is running.
    pub fn watch_worker(&self, mapping_id: u64) -> Option<watch::Receiver<WorkerPhase>> {
        self.workers.get(&mapping_id).map(WorkerHandle::watch_phase)
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        let mut out: Vec<WorkerStatus> = self
            .workers
            .values()
            .map(|w| WorkerStatus {
                mapping_id: w.mapping().id,
                server: w.mapping().source_server_url.clone(),
                topic: w.mapping().source_topic.clone(),
                phase: w.phase(),
            })
            .collect();
        out.sort_by_key(|s| s.mapping_id);
        out
    }

    /// Diff stored mappings against running workers and fix the difference.
    /// Workers whose mapping is unchanged are left alone.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, StoreError> {
        let desired: HashMap<u64, Mapping> = self
            .store
            .list_mappings()
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let mut report = ReconcileReport::default();
        let mut restarting = HashSet::new();
        let mut to_stop = Vec::new();

        let running: Vec<u64> = self.workers.keys().copied().collect();
        for id in running {
            let Some(handle) = self.workers.get(&id) else {
                continue;
            };
            match desired.get(&id) {
                None => {
                    info!(mapping_id = id, "mapping has been deleted, stopping worker");
                    report.stopped += 1;
                }
                Some(m) if m != handle.mapping() => {
                    info!(mapping_id = id, "mapping changed, restarting worker");
                    restarting.insert(id);
                }
                Some(_) if handle.is_finished() => {
                    warn!(mapping_id = id, "worker exited unexpectedly, restarting");
                    restarting.insert(id);
                }
                Some(_) => continue,
            }
            if let Some(handle) = self.workers.remove(&id) {
                to_stop.push(handle);
            }
        }

        let grace = self.grace;
        for clean in join_all(to_stop.into_iter().map(|h| h.stop(grace))).await {
            if !clean {
                warn!("worker did not stop within the grace period and was aborted");
            }
        }

        let mut new_ids: Vec<u64> = desired
            .keys()
            .filter(|id| !self.workers.contains_key(id))
            .copied()
            .collect();
        new_ids.sort_unstable();
        for id in new_ids {
            let Some(mapping) = desired.get(&id) else {
                continue;
            };
            if restarting.contains(&id) {
                report.restarted += 1;
            } else {
                info!(mapping_id = id, topic = %mapping.source_topic, "found new mapping, starting worker");
                report.started += 1;
            }
            let handle = WorkerHandle::spawn(mapping.clone(), self.ctx.clone(), &self.root);
            self.workers.insert(id, handle);
        }

        gauge!("bridge_active_workers").set(self.workers.len() as f64);
        Ok(report)
    }

    async fn reconcile_logged(&mut self) -> ReconcileReport {
        match self.reconcile().await {
            Ok(report) => {
                if !report.is_noop() {
                    info!(
                        started = report.started,
                        stopped = report.stopped,
                        restarted = report.restarted,
                        active = self.workers.len(),
                        "reconciled workers"
                    );
                }
                report
            }
            Err(e) => {
                error!(error = %e, "could not read mappings; keeping current workers");
                ReconcileReport::default()
            }
        }
    }

    /// Reconcile on every tick and on request until `shutdown` fires, then
    /// stop every worker.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.reconcile_logged().await;
                }
                Some(cmd) = self.rx.recv() => match cmd {
                    SupervisorCommand::Reconcile { reply } => {
                        let report = self.reconcile_logged().await;
                        let _ = reply.send(report);
                    }
                    SupervisorCommand::Status { reply } => {
                        let _ = reply.send(self.status());
                    }
                },
            }
        }

        self.shutdown().await;
    }

    /// Cancel every worker and wait for all of them to release their
    /// connections.
    pub async fn shutdown(&mut self) {
        info!(workers = self.workers.len(), "stopping all workers");
        self.root.cancel();
        let grace = self.grace;
        let handles: Vec<WorkerHandle> = self.workers.drain().map(|(_, h)| h).collect();
        join_all(handles.into_iter().map(|h| h.stop(grace))).await;
        gauge!("bridge_active_workers").set(0.0);
    }
}
