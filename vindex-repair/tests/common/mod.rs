#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vindex_repair::{
    EntityManager, ReadRepairCoordinator, RepairConfig, RepairExecutor, RepairMetrics,
    RepairService, RepairSwitch,
};
use vindex_storage::{
    CurrentVersion, DeleteOutcome, EntityStore, Query, SearchIndex, SqliteEntityStore,
    SqliteSearchIndex, StorageError, StorageResult, WriteEventBus,
};
use vindex_types::{
    Candidate, EntityId, EntityRecord, Fields, IndexEntry, ScopeId, Version,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}

pub struct Stack {
    pub bus: WriteEventBus,
    pub store: Arc<SqliteEntityStore>,
    pub index: Arc<SqliteSearchIndex>,
}

impl Stack {
    pub fn new() -> Self {
        let bus = WriteEventBus::new();
        let store = Arc::new(
            SqliteEntityStore::open_in_memory()
                .unwrap()
                .with_bus(bus.clone()),
        );
        let index = Arc::new(SqliteSearchIndex::open_in_memory().unwrap());
        Self { bus, store, index }
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    pub fn index(&self) -> Arc<dyn SearchIndex> {
        self.index.clone()
    }

    pub fn service(&self, config: RepairConfig, switch: RepairSwitch) -> RepairService {
        RepairService::start(self.store(), self.index(), &self.bus, config, switch).unwrap()
    }
}

/// A coordinator and manager with no event workers attached.
pub fn read_path_only(
    store: Arc<dyn EntityStore>,
    index: Arc<dyn SearchIndex>,
    config: RepairConfig,
) -> (Arc<ReadRepairCoordinator>, EntityManager, Arc<RepairMetrics>) {
    let metrics = Arc::new(RepairMetrics::new());
    let executor = Arc::new(RepairExecutor::new(
        store.clone(),
        index.clone(),
        metrics.clone(),
    ));
    let coordinator = Arc::new(ReadRepairCoordinator::new(
        store.clone(),
        index.clone(),
        executor,
        metrics.clone(),
        config,
    )
    .unwrap());
    let manager = EntityManager::new(ScopeId::new(), store, index, coordinator.clone());
    (coordinator, manager, metrics)
}

/// Polls `check` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Index wrapper whose deletes and lookups fail while `failing` is set, or
/// for the first `fail_deletes` delete calls.
pub struct FlakyIndex {
    pub inner: Arc<dyn SearchIndex>,
    pub failing: AtomicBool,
    pub fail_deletes: AtomicUsize,
    pub delete_calls: AtomicUsize,
}

impl FlakyIndex {
    pub fn new(inner: Arc<dyn SearchIndex>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            fail_deletes: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.fail_deletes.store(n, Ordering::SeqCst);
    }

    fn outage() -> StorageError {
        StorageError::Unavailable("index offline".into())
    }
}

#[async_trait]
impl SearchIndex for FlakyIndex {
    async fn insert(&self, entry: &IndexEntry) -> StorageResult<()> {
        self.inner.insert(entry).await
    }

    async fn query(
        &self,
        scope: &ScopeId,
        collection: &str,
        query: &Query,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<Candidate>> {
        self.inner.query(scope, collection, query, limit, offset).await
    }

    async fn entries_for(&self, id: &EntityId) -> StorageResult<Vec<Candidate>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.entries_for(id).await
    }

    async fn delete_entry(&self, id: &EntityId, version: Version) -> StorageResult<DeleteOutcome> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        let failed_early = self
            .fail_deletes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed_early {
            return Err(Self::outage());
        }
        self.inner.delete_entry(id, version).await
    }

    async fn contains(&self, id: &EntityId, version: Version) -> StorageResult<bool> {
        self.inner.contains(id, version).await
    }

    async fn count(&self, scope: &ScopeId, collection: &str, query: &Query) -> StorageResult<usize> {
        self.inner.count(scope, collection, query).await
    }
}

/// Store wrapper that can go offline, and can report pinned (lagging)
/// versions for chosen entities.
pub struct TestStore {
    pub inner: Arc<dyn EntityStore>,
    pub offline: AtomicBool,
    pub pinned: Mutex<HashMap<EntityId, CurrentVersion>>,
}

impl TestStore {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
            pinned: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the store report `version` as current for `id`.
    pub fn pin(&self, id: EntityId, version: Version) {
        self.pinned.lock().unwrap().insert(
            id,
            CurrentVersion {
                version,
                tombstone: false,
            },
        );
    }

    fn check(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable("store offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntityStore for TestStore {
    async fn current_version(&self, id: &EntityId) -> StorageResult<Option<CurrentVersion>> {
        self.check()?;
        let pinned = self.pinned.lock().unwrap().get(id).copied();
        if pinned.is_some() {
            return Ok(pinned);
        }
        self.inner.current_version(id).await
    }

    async fn load(&self, id: &EntityId) -> StorageResult<Option<EntityRecord>> {
        self.check()?;
        self.inner.load(id).await
    }

    async fn create(
        &self,
        scope: ScopeId,
        collection: &str,
        entity_type: &str,
        fields: Fields,
    ) -> StorageResult<EntityRecord> {
        self.check()?;
        self.inner.create(scope, collection, entity_type, fields).await
    }

    async fn update(&self, id: &EntityId, fields: Fields) -> StorageResult<EntityRecord> {
        self.check()?;
        self.inner.update(id, fields).await
    }

    async fn delete(&self, id: &EntityId) -> StorageResult<Version> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn history(&self, id: &EntityId) -> StorageResult<Vec<EntityRecord>> {
        self.check()?;
        self.inner.history(id).await
    }
}
