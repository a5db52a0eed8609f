//! Event-driven repair.
//!
//! A pool of shard tasks consumes write events from the bus and removes the
//! index entries each write made stale. Events are routed by entity id, so
//! all events for one entity run one at a time, in arrival order, on the
//! same shard. Failed events are re-queued to their shard with exponential
//! backoff until `max_attempts` is reached.
//!
//! ```text
//! Received ──▶ Diffing ──▶ Repairing ──▶ Done
//!                 │            │
//!                 └────────────┴──▶ Failed ──▶ (backoff) ──▶ Received
//! ```

use crate::config::RepairConfig;
use crate::detector::StaleClassification;
use crate::error::RepairError;
use crate::executor::RepairExecutor;
use crate::metrics::RepairMetrics;
use crate::switch::RepairSwitch;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vindex_storage::{SearchIndex, WriteEventReceiver};
use vindex_types::{Candidate, WriteEvent, WriteKind};

/// Where an event is in its repair lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Received,
    Diffing,
    Repairing,
    /// Every removal succeeded or was a no-op.
    Done,
    /// The event was dropped because repair is switched off.
    Skipped,
    /// At least one lookup or removal failed. Retried until
    /// `max_attempts` is reached.
    Failed,
}

/// Runs the per-event state machine. Holds no per-event state itself.
pub struct EventRepairer {
    index: Arc<dyn SearchIndex>,
    executor: Arc<RepairExecutor>,
    switch: RepairSwitch,
    metrics: Arc<RepairMetrics>,
}

impl EventRepairer {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        executor: Arc<RepairExecutor>,
        switch: RepairSwitch,
        metrics: Arc<RepairMetrics>,
    ) -> Self {
        Self {
            index,
            executor,
            switch,
            metrics,
        }
    }

    /// Takes one event from `Received` to a final state.
    pub async fn handle(&self, event: &WriteEvent) -> RepairState {
        let mut state = RepairState::Received;
        debug!("Event {} for {}: {:?}", event.id, event.entity_id, state);

        if !self.switch.is_enabled() {
            self.metrics.event_skipped();
            debug!("Repair disabled, dropping event {}", event.id);
            return RepairState::Skipped;
        }

        state = RepairState::Diffing;
        debug!("Event {} for {}: {:?}", event.id, event.entity_id, state);
        let entries = match self.index.entries_for(&event.entity_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Diffing {} failed: {}", event.entity_id, e);
                return RepairState::Failed;
            }
        };
        let doomed = superseded_entries(event, entries);

        state = RepairState::Repairing;
        debug!(
            "Event {} for {}: {:?} {} entr(ies)",
            event.id,
            event.entity_id,
            state,
            doomed.len()
        );
        let report = self.executor.repair_all(doomed).await;

        if report.is_clean() {
            self.metrics.event_processed();
            RepairState::Done
        } else {
            warn!(
                "Event {} for {}: {} of {} removals failed",
                event.id,
                event.entity_id,
                report.failed,
                report.total()
            );
            RepairState::Failed
        }
    }
}

/// Index entries the event makes stale, with their classification.
///
/// A write supersedes entries older than its version; entries at or above
/// it belong to this or later writes. A delete orphans every entry.
pub fn superseded_entries(
    event: &WriteEvent,
    entries: Vec<Candidate>,
) -> Vec<(Candidate, StaleClassification)> {
    match event.kind {
        WriteKind::Written { version } => entries
            .into_iter()
            .filter(|c| c.version < version)
            .map(|c| {
                (
                    c,
                    StaleClassification::Stale {
                        superseded_by: version,
                    },
                )
            })
            .collect(),
        WriteKind::Deleted { .. } => entries
            .into_iter()
            .map(|c| (c, StaleClassification::Orphaned))
            .collect(),
    }
}

struct Job {
    event: WriteEvent,
    attempt: u32,
    first_seen: Instant,
}

/// Handle to a running worker pool.
pub struct RepairWorkerHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
    shards: Vec<JoinHandle<()>>,
}

impl RepairWorkerHandle {
    /// Stops accepting events, lets the shards drain what they already hold,
    /// and waits for them. Retries still waiting on backoff are abandoned.
    pub async fn shutdown(mut self) -> Result<(), RepairError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.await.map_err(|_| RepairError::ChannelClosed)?;
        }
        for shard in self.shards.drain(..) {
            shard.await.map_err(|_| RepairError::ChannelClosed)?;
        }
        info!("Repair workers stopped");
        Ok(())
    }

    /// Number of shard tasks.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Drop for RepairWorkerHandle {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        for shard in &self.shards {
            shard.abort();
        }
    }
}

/// Starts the dispatcher and `config.worker_count` shard tasks consuming
/// `events`.
pub fn spawn_repair_workers(
    repairer: Arc<EventRepairer>,
    config: &RepairConfig,
    mut events: WriteEventReceiver,
) -> RepairWorkerHandle {
    let shard_count = config.worker_count.max(1);
    let mut senders = Vec::with_capacity(shard_count);
    let mut shards = Vec::with_capacity(shard_count);

    for shard_id in 0..shard_count {
        let (tx, rx) = mpsc::unbounded_channel();
        let retry_tx = tx.downgrade();
        shards.push(tokio::spawn(run_shard(
            shard_id,
            repairer.clone(),
            config.clone(),
            rx,
            retry_tx,
        )));
        senders.push(tx);
    }

    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let dispatcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                next = events.recv() => {
                    let Some(event) = next else {
                        debug!("Write event bus closed");
                        break;
                    };
                    let shard = (event.entity_id.routing_key() % senders.len() as u64) as usize;
                    let job = Job { event, attempt: 1, first_seen: Instant::now() };
                    if senders[shard].send(job).is_err() {
                        error!("Repair shard {} is gone", shard);
                    }
                }
            }
        }
    });

    info!("Started {} repair worker shard(s)", shard_count);
    RepairWorkerHandle {
        stop_tx: Some(stop_tx),
        dispatcher: Some(dispatcher),
        shards,
    }
}

async fn run_shard(
    shard_id: usize,
    repairer: Arc<EventRepairer>,
    config: RepairConfig,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    retry_tx: mpsc::WeakUnboundedSender<Job>,
) {
    while let Some(job) = jobs.recv().await {
        let state = repairer.handle(&job.event).await;
        match state {
            RepairState::Failed if job.attempt < config.max_attempts => {
                let delay = Duration::from_millis(config.backoff_ms(job.attempt));
                repairer
                    .metrics
                    .retry_pending(job.event.id, job.first_seen);
                debug!(
                    "Shard {}: retrying event {} in {:?} (attempt {})",
                    shard_id,
                    job.event.id,
                    delay,
                    job.attempt + 1
                );
                let retry_tx = retry_tx.clone();
                let metrics = repairer.metrics.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let event_id = job.event.id;
                    let retry = Job {
                        attempt: job.attempt + 1,
                        ..job
                    };
                    let sent = retry_tx.upgrade().is_some_and(|tx| tx.send(retry).is_ok());
                    if !sent {
                        warn!("Dropping retry of event {}: workers stopped", event_id);
                        metrics.retry_settled(&event_id);
                    }
                });
            }
            RepairState::Failed => {
                let err = RepairError::RetryExhausted {
                    event_id: job.event.id,
                    entity_id: job.event.entity_id,
                    attempts: job.attempt,
                };
                error!("{err}; relying on read-path repair");
                repairer.metrics.retry_exhausted(&job.event.id);
            }
            RepairState::Done | RepairState::Skipped => {
                repairer.metrics.retry_settled(&job.event.id);
            }
            RepairState::Received | RepairState::Diffing | RepairState::Repairing => {}
        }
    }
    debug!("Repair shard {} drained", shard_id);
}
