mod common;

use common::{eventually, fields, init_tracing, FlakyIndex, Stack};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use vindex_repair::{
    spawn_repair_workers, superseded_entries, EventRepairer, RepairConfig, RepairExecutor,
    RepairMetrics, RepairState, RepairSwitch, StaleClassification,
};
use vindex_storage::{EntityStore, SearchIndex, WriteEventBus};
use vindex_types::{Candidate, EntityId, EntityRecord, ScopeId, Version, WriteEvent};

fn entry(id: EntityId, wall: u64) -> Candidate {
    Candidate::new(id, Version::new(wall, 0), "dog", Version::new(1, 0))
}

fn fast_config() -> RepairConfig {
    RepairConfig {
        worker_count: 2,
        max_attempts: 4,
        base_backoff_ms: 5,
        max_backoff_ms: 20,
        ..RepairConfig::default()
    }
}

struct Fixture {
    stack: Stack,
    flaky: Arc<FlakyIndex>,
    switch: RepairSwitch,
    metrics: Arc<RepairMetrics>,
    repairer: Arc<EventRepairer>,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let stack = Stack::new();
        let flaky = Arc::new(FlakyIndex::new(stack.index()));
        let switch = RepairSwitch::default();
        let metrics = Arc::new(RepairMetrics::new());
        let executor = Arc::new(RepairExecutor::new(
            stack.store(),
            flaky.clone(),
            metrics.clone(),
        ));
        let repairer = Arc::new(EventRepairer::new(
            flaky.clone(),
            executor,
            switch.clone(),
            metrics.clone(),
        ));
        Self {
            stack,
            flaky,
            switch,
            metrics,
            repairer,
        }
    }

    /// Creates an entity with `updates` extra versions, all indexed.
    async fn indexed_entity(&self, updates: usize) -> Vec<EntityRecord> {
        let first = self
            .stack
            .store
            .create(ScopeId::new(), "dogs", "dog", fields(&[]))
            .await
            .unwrap();
        let mut records = vec![first.clone()];
        for _ in 0..updates {
            records.push(self.stack.store.update(&first.id, fields(&[])).await.unwrap());
        }
        for record in &records {
            self.stack.index.insert(&record.to_index_entry()).await.unwrap();
        }
        records
    }

    fn written(record: &EntityRecord) -> WriteEvent {
        WriteEvent::written(record.id, record.scope, &record.collection, record.version)
    }

    async fn indexed_versions(&self, id: &EntityId) -> Vec<Version> {
        self.stack
            .index
            .entries_for(id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.version)
            .collect()
    }
}

// ── Diffing ──────────────────────────────────────────────────────

#[test]
fn write_supersedes_only_older_entries() {
    let id = EntityId::new();
    let event = WriteEvent::written(id, ScopeId::new(), "dogs", Version::new(3, 0));
    let entries = vec![entry(id, 1), entry(id, 2), entry(id, 3), entry(id, 4)];

    let doomed = superseded_entries(&event, entries);

    let versions: Vec<_> = doomed.iter().map(|(c, _)| c.version).collect();
    assert_eq!(versions, vec![Version::new(1, 0), Version::new(2, 0)]);
    assert!(doomed.iter().all(|(_, class)| *class
        == StaleClassification::Stale {
            superseded_by: Version::new(3, 0)
        }));
}

#[test]
fn delete_orphans_every_entry() {
    let id = EntityId::new();
    let event = WriteEvent::deleted(id, ScopeId::new(), "dogs", Version::new(5, 0));
    let entries = vec![entry(id, 1), entry(id, 4)];

    let doomed = superseded_entries(&event, entries);

    assert_eq!(doomed.len(), 2);
    assert!(doomed
        .iter()
        .all(|(_, class)| *class == StaleClassification::Orphaned));
}

// ── Single event ─────────────────────────────────────────────────

#[tokio::test]
async fn handle_removes_superseded_versions() {
    let fx = Fixture::new();
    let records = fx.indexed_entity(2).await;
    let latest = records.last().unwrap();

    let state = fx.repairer.handle(&Fixture::written(latest)).await;

    assert_eq!(state, RepairState::Done);
    assert_eq!(fx.indexed_versions(&latest.id).await, vec![latest.version]);
    assert_eq!(fx.metrics.snapshot().entries_removed, 2);
    assert_eq!(fx.metrics.snapshot().events_processed, 1);
}

#[tokio::test]
async fn handle_is_repeatable() {
    let fx = Fixture::new();
    let records = fx.indexed_entity(1).await;
    let event = Fixture::written(&records[1]);

    assert_eq!(fx.repairer.handle(&event).await, RepairState::Done);
    assert_eq!(fx.repairer.handle(&event).await, RepairState::Done);
    assert_eq!(fx.metrics.snapshot().entries_removed, 1);
}

#[tokio::test]
async fn handle_after_delete_clears_entity() {
    let fx = Fixture::new();
    let records = fx.indexed_entity(1).await;
    let id = records[0].id;
    let tombstone = fx.stack.store.delete(&id).await.unwrap();

    let event = WriteEvent::deleted(id, records[0].scope, "dogs", tombstone);
    assert_eq!(fx.repairer.handle(&event).await, RepairState::Done);
    assert!(fx.indexed_versions(&id).await.is_empty());
}

#[tokio::test]
async fn disabled_switch_skips_event() {
    let fx = Fixture::new();
    let records = fx.indexed_entity(1).await;
    fx.switch.disable();

    let state = fx.repairer.handle(&Fixture::written(&records[1])).await;

    assert_eq!(state, RepairState::Skipped);
    assert_eq!(fx.indexed_versions(&records[0].id).await.len(), 2);
    assert_eq!(fx.metrics.snapshot().events_skipped, 1);
}

#[tokio::test]
async fn index_outage_fails_the_event() {
    let fx = Fixture::new();
    let records = fx.indexed_entity(1).await;
    fx.flaky.set_failing(true);

    let state = fx.repairer.handle(&Fixture::written(&records[1])).await;

    assert_eq!(state, RepairState::Failed);
    assert_eq!(fx.metrics.snapshot().events_processed, 0);
}

#[tokio::test]
async fn failed_removal_is_not_counted_as_processed() {
    let fx = Fixture::new();
    let records = fx.indexed_entity(1).await;
    fx.flaky.fail_next_deletes(1);

    let state = fx.repairer.handle(&Fixture::written(&records[1])).await;

    assert_eq!(state, RepairState::Failed);
    let snapshot = fx.metrics.snapshot();
    assert_eq!(snapshot.events_processed, 0);
    assert_eq!(snapshot.repairs_failed, 1);
    assert_eq!(fx.indexed_versions(&records[0].id).await.len(), 2);
}

// ── Worker pool ──────────────────────────────────────────────────

#[tokio::test]
async fn workers_repair_published_events() {
    let fx = Fixture::new();
    let bus = WriteEventBus::new();
    let handle = spawn_repair_workers(fx.repairer.clone(), &fast_config(), bus.subscribe());
    assert_eq!(handle.shard_count(), 2);

    let mut latest = Vec::new();
    for _ in 0..5 {
        let records = fx.indexed_entity(3).await;
        let last = records.last().unwrap().clone();
        bus.publish(Fixture::written(&last));
        latest.push(last);
    }

    let clean = eventually(Duration::from_secs(5), || async {
        for record in &latest {
            if fx.indexed_versions(&record.id).await != vec![record.version] {
                return false;
            }
        }
        true
    })
    .await;
    assert!(clean);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_event_is_retried() {
    let fx = Fixture::new();
    let bus = WriteEventBus::new();
    let handle = spawn_repair_workers(fx.repairer.clone(), &fast_config(), bus.subscribe());
    let records = fx.indexed_entity(1).await;
    fx.flaky.fail_next_deletes(2);

    bus.publish(Fixture::written(&records[1]));

    let repaired = eventually(Duration::from_secs(5), || async {
        fx.indexed_versions(&records[0].id).await == vec![records[1].version]
    })
    .await;
    assert!(repaired);
    assert_eq!(fx.metrics.snapshot().retries_scheduled, 2);
    assert_eq!(fx.metrics.snapshot().retries_exhausted, 0);
    assert!(
        eventually(Duration::from_secs(1), || async { fx.metrics.lag().pending == 0 }).await
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn retries_stop_after_max_attempts() {
    let fx = Fixture::new();
    let bus = WriteEventBus::new();
    let config = RepairConfig {
        max_attempts: 3,
        ..fast_config()
    };
    let handle = spawn_repair_workers(fx.repairer.clone(), &config, bus.subscribe());
    let records = fx.indexed_entity(1).await;
    fx.flaky.set_failing(true);

    bus.publish(Fixture::written(&records[1]));

    let exhausted = eventually(Duration::from_secs(5), || async {
        fx.metrics.snapshot().retries_exhausted == 1
    })
    .await;
    assert!(exhausted);
    assert_eq!(fx.metrics.snapshot().retries_scheduled, 2);
    assert_eq!(fx.metrics.lag().pending, 0);
    assert_eq!(fx.indexed_versions(&records[0].id).await.len(), 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn pending_retry_shows_as_lag() {
    let fx = Fixture::new();
    let bus = WriteEventBus::new();
    let config = RepairConfig {
        base_backoff_ms: 10_000,
        max_backoff_ms: 10_000,
        ..fast_config()
    };
    let handle = spawn_repair_workers(fx.repairer.clone(), &config, bus.subscribe());
    let records = fx.indexed_entity(1).await;
    fx.flaky.set_failing(true);

    bus.publish(Fixture::written(&records[1]));

    let lagging = eventually(Duration::from_secs(5), || async {
        fx.metrics.lag().pending == 1
    })
    .await;
    assert!(lagging);
    assert!(fx.metrics.lag().oldest_age.is_some());
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_consuming() {
    let fx = Fixture::new();
    let bus = WriteEventBus::new();
    let handle = spawn_repair_workers(fx.repairer.clone(), &fast_config(), bus.subscribe());

    handle.shutdown().await.unwrap();

    let records = fx.indexed_entity(1).await;
    assert_eq!(bus.publish(Fixture::written(&records[1])), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.indexed_versions(&records[0].id).await.len(), 2);
}
