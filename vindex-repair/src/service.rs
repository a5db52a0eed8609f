//! Wires the repair components around one store/index pair.

use crate::config::RepairConfig;
use crate::coordinator::ReadRepairCoordinator;
use crate::error::RepairResult;
use crate::executor::RepairExecutor;
use crate::manager::EntityManager;
use crate::metrics::{RepairLag, RepairMetrics};
use crate::switch::RepairSwitch;
use crate::worker::{spawn_repair_workers, EventRepairer, RepairWorkerHandle};
use std::sync::Arc;
use vindex_storage::{EntityStore, SearchIndex, WriteEventBus};
use vindex_types::ScopeId;

/// A running repair subsystem: read-path coordinator plus event workers
/// subscribed to the store's write-event bus.
pub struct RepairService {
    store: Arc<dyn EntityStore>,
    index: Arc<dyn SearchIndex>,
    coordinator: Arc<ReadRepairCoordinator>,
    metrics: Arc<RepairMetrics>,
    switch: RepairSwitch,
    workers: Option<RepairWorkerHandle>,
}

impl RepairService {
    /// Validates `config`, subscribes to `bus` and starts the workers.
    /// Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<dyn EntityStore>,
        index: Arc<dyn SearchIndex>,
        bus: &WriteEventBus,
        config: RepairConfig,
        switch: RepairSwitch,
    ) -> RepairResult<Self> {
        config.validate()?;
        let metrics = Arc::new(RepairMetrics::new());
        let executor = Arc::new(
            RepairExecutor::new(store.clone(), index.clone(), metrics.clone())
                .with_concurrency(config.repair_concurrency)
                .with_reindex_current(config.reindex_current),
        );
        let coordinator = Arc::new(ReadRepairCoordinator::new(
            store.clone(),
            index.clone(),
            executor.clone(),
            metrics.clone(),
            config.clone(),
        )?);
        let repairer = Arc::new(EventRepairer::new(
            index.clone(),
            executor,
            switch.clone(),
            metrics.clone(),
        ));
        let workers = spawn_repair_workers(repairer, &config, bus.subscribe());

        Ok(Self {
            store,
            index,
            coordinator,
            metrics,
            switch,
            workers: Some(workers),
        })
    }

    /// An entity manager for one application scope.
    pub fn manager(&self, scope: ScopeId) -> EntityManager {
        EntityManager::new(
            scope,
            self.store.clone(),
            self.index.clone(),
            self.coordinator.clone(),
        )
    }

    pub fn coordinator(&self) -> &Arc<ReadRepairCoordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<RepairMetrics> {
        &self.metrics
    }

    pub fn switch(&self) -> &RepairSwitch {
        &self.switch
    }

    /// Count and age of write events waiting for a retry.
    pub fn lag(&self) -> RepairLag {
        self.metrics.lag()
    }

    /// Stops the event workers after they drain queued events.
    pub async fn shutdown(mut self) -> RepairResult<()> {
        match self.workers.take() {
            Some(workers) => workers.shutdown().await,
            None => Ok(()),
        }
    }
}
