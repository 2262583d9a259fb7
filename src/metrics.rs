// src/metrics.rs
use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "bridge_records_received_total",
            "ntfy message records decoded from subscription streams."
        );
        describe_counter!(
            "bridge_parse_errors_total",
            "Stream lines skipped because they could not be decoded."
        );
        describe_counter!(
            "bridge_deliveries_total",
            "Records handed to the webhook client, by final outcome."
        );
        describe_counter!(
            "bridge_delivery_attempts_total",
            "Individual webhook POST attempts, retries included."
        );
        describe_counter!(
            "bridge_reconnects_total",
            "Subscription connection attempts after a failure or disconnect."
        );
        describe_gauge!("bridge_active_workers", "Running subscription workers.");
    });
}
