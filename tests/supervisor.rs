// tests/supervisor.rs
//! Reconciliation of workers against the mapping store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{context, ScriptedSource};
use ntfy_discord_bridge::mapping::MemoryStore;
use ntfy_discord_bridge::{MappingStore, ReconcileReport, Supervisor, WorkerPhase};
use tokio_util::sync::CancellationToken;

const GRACE: Duration = Duration::from_secs(2);

fn supervisor(
    store: &Arc<MemoryStore>,
    source: &Arc<ScriptedSource>,
    min_ms: u64,
) -> (Supervisor, ntfy_discord_bridge::SupervisorHandle) {
    Supervisor::new(
        store.clone(),
        context(source.clone(), min_ms, min_ms * 8),
        Duration::from_secs(30),
        GRACE,
    )
}

#[tokio::test(start_paused = true)]
async fn reconcile_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert(common::mapping(1, "https://ntfy.test", "a", "https://discord.test/1"))
        .await;
    store
        .upsert(common::mapping(2, "https://ntfy.test", "b", "https://discord.test/2"))
        .await;
    let source = ScriptedSource::always_failing();
    let (mut sup, _handle) = supervisor(&store, &source, 1_000);

    let first = sup.reconcile().await.unwrap();
    assert_eq!(
        first,
        ReconcileReport {
            started: 2,
            stopped: 0,
            restarted: 0
        }
    );

    let second = sup.reconcile().await.unwrap();
    assert!(second.is_noop(), "{second:?}");
    assert_eq!(sup.worker_count(), 2);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.call_count(1), 1, "unchanged worker was not restarted");

    sup.shutdown().await;
    assert_eq!(sup.worker_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn removed_mapping_stops_its_worker_mid_backoff() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert(common::mapping(1, "https://ntfy.test", "a", "https://discord.test/1"))
        .await;
    let source = ScriptedSource::always_failing();
    let (mut sup, _handle) = supervisor(&store, &source, 10_000);

    sup.reconcile().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut phase = sup.watch_worker(1).expect("worker running");
    assert_eq!(*phase.borrow_and_update(), WorkerPhase::Backoff);

    store.delete_mapping(1).await.unwrap();
    let started = tokio::time::Instant::now();
    let report = sup.reconcile().await.unwrap();

    assert_eq!(report.stopped, 1);
    assert!(started.elapsed() < GRACE);
    assert_eq!(*phase.borrow(), WorkerPhase::Stopped);
    assert_eq!(sup.worker_count(), 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(source.call_count(1), 1, "no attempts after removal");
}

#[tokio::test(start_paused = true)]
async fn changed_webhook_restarts_the_worker() {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert(common::mapping(1, "https://ntfy.test", "a", "https://discord.test/1"))
        .await;
    let source = ScriptedSource::always_failing();
    let (mut sup, _handle) = supervisor(&store, &source, 1_000);
    sup.reconcile().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.call_count(1), 1);

    store
        .upsert(common::mapping(1, "https://ntfy.test", "a", "https://discord.test/other"))
        .await;
    let report = sup.reconcile().await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            started: 0,
            stopped: 0,
            restarted: 1
        }
    );
    assert_eq!(sup.worker_count(), 1);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(source.call_count(1), 2, "restarted worker subscribed again");
    sup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn run_loop_answers_commands_and_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::always_failing();
    let (sup, handle) = supervisor(&store, &source, 1_000);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(sup.run(shutdown.clone()));

    assert!(handle.status().await.is_empty());

    store
        .upsert(common::mapping(3, "https://ntfy.test", "c", "https://discord.test/3"))
        .await;
    let report = handle.reconcile().await.expect("supervisor alive");
    assert_eq!(report.started, 1);

    let status = handle.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].mapping_id, 3);
    assert_eq!(status[0].topic, "c");

    shutdown.cancel();
    tokio::time::timeout(GRACE * 2, task)
        .await
        .expect("supervisor exits within grace")
        .unwrap();
    assert!(handle.reconcile().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn periodic_tick_picks_up_new_mappings() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::always_failing();
    let (sup, handle) = supervisor(&store, &source, 1_000);
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(sup.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    store
        .upsert(common::mapping(5, "https://ntfy.test", "e", "https://discord.test/5"))
        .await;
    assert!(handle.status().await.is_empty());

    tokio::time::sleep(Duration::from_secs(31)).await;
    let status = handle.status().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].mapping_id, 5);

    shutdown.cancel();
    task.await.unwrap();
}
