// src/lib.rs
// Public library surface for the daemon, the CLI and integration tests.

pub mod api;
pub mod backoff;
pub mod classify;
pub mod config;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod notify;
pub mod ntfy;
pub mod supervisor;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::classify::{classify, ClassifiedNotification, Severity};
pub use crate::mapping::{Auth, Mapping, MappingStore, NewMapping};
pub use crate::supervisor::{ReconcileReport, Supervisor, SupervisorHandle};
pub use crate::worker::{WorkerContext, WorkerPhase};

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::notify::DeliveryClient;
use crate::ntfy::NtfyClient;

/// Worker collaborators built from config: the ntfy HTTP subscriber and the
/// Discord delivery client.
pub fn worker_context(cfg: &BridgeConfig) -> anyhow::Result<WorkerContext> {
    let source = NtfyClient::new(&cfg.stream)?;
    Ok(WorkerContext {
        source: Arc::new(source),
        delivery: DeliveryClient::from_config(&cfg.delivery),
        reconnect: cfg.reconnect.clone(),
    })
}
