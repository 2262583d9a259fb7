//! ntfy → Discord bridge daemon.
//! Loads config, starts the supervisor over the JSON mapping store and serves
//! the admin API until Ctrl-C / SIGTERM.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ntfy_discord_bridge::api::{self, ApiState};
use ntfy_discord_bridge::config::BridgeConfig;
use ntfy_discord_bridge::mapping::{JsonFileStore, MappingStore};
use ntfy_discord_bridge::metrics::Metrics;
use ntfy_discord_bridge::{worker_context, Supervisor};

/// `RUST_LOG` controls the filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ntfy_discord_bridge=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = BridgeConfig::load_default()?;
    info!(
        store = %cfg.store_path.display(),
        reconcile_secs = cfg.reconcile_interval_secs,
        "🚀 starting ntfy-discord bridge"
    );

    let store: Arc<dyn MappingStore> = Arc::new(JsonFileStore::new(&cfg.store_path));
    let ctx = worker_context(&cfg).context("building HTTP clients")?;
    let (supervisor, handle) = Supervisor::new(
        store.clone(),
        ctx,
        cfg.reconcile_interval(),
        cfg.shutdown_grace(),
    );

    let shutdown = CancellationToken::new();
    let supervisor_task = tokio::spawn(supervisor.run(shutdown.clone()));

    let server_task = if cfg.listen_addr.is_empty() {
        None
    } else {
        let metrics = Metrics::init()?;
        let app = api::router(ApiState {
            store,
            supervisor: handle,
        })
        .merge(metrics.router());

        let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
            .await
            .with_context(|| format!("binding admin API to {}", cfg.listen_addr))?;
        info!(addr = %cfg.listen_addr, "admin API listening");

        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }))
    };

    shutdown_signal().await;
    info!("shutdown requested");
    shutdown.cancel();

    supervisor_task.await.context("supervisor task failed")?;
    if let Some(task) = server_task {
        task.await
            .context("admin API task failed")?
            .context("admin API server error")?;
    }
    info!("bye");
    Ok(())
}
