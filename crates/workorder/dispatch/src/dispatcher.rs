//! Work order dispatcher
//!
//! Schedules `advance` calls: a worker pool pulls tasks from a bounded
//! queue, a per-work-order in-flight set coalesces duplicate enqueues so at
//! most one advance runs per work order at a time, and a per-tenant
//! semaphore keeps one tenant from starving the others. A `Ready` outcome
//! re-enqueues the work order; `Suspended` and terminal outcomes drop it
//! from the queue. Version conflicts re-enqueue after a short delay.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use workorder_engine::{AdvanceResult, ExecutionEngine};
use workorder_types::{Stage, TenantId, WorkOrderError, WorkOrderId};

/// Dispatcher-level failures
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// How one scheduled advance ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// More nodes to run; the work order went back on the queue
    Requeued,
    /// A concurrent writer raced the advance; retried after a delay
    Conflict,
    /// Suspended awaiting approval; left the queue
    Suspended,
    /// Reached a terminal stage; left the queue
    Terminal(Stage),
    /// The advance itself failed; left the queue
    Error(String),
}

/// One observable scheduling outcome, for embedders and tests
#[derive(Clone, Debug)]
pub struct DispatchEvent {
    pub work_order_id: WorkOrderId,
    pub outcome: DispatchOutcome,
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Workers pulling from the queue
    pub worker_count: usize,
    /// Bounded queue capacity
    pub queue_capacity: usize,
    /// Concurrent advances allowed per tenant
    pub per_tenant_limit: usize,
    /// Delay before re-enqueueing after a version conflict
    pub conflict_retry_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            per_tenant_limit: 2,
            conflict_retry_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Clone, Debug)]
struct Task {
    tenant_id: TenantId,
    work_order_id: WorkOrderId,
}

/// Shared state the workers operate on
struct Shared {
    engine: Arc<ExecutionEngine>,
    /// Work orders currently queued or being advanced — the coalescing set
    inflight: Mutex<HashSet<WorkOrderId>>,
    /// Lazily created per-tenant concurrency bounds
    tenant_slots: Mutex<HashMap<TenantId, Arc<Semaphore>>>,
    events: broadcast::Sender<DispatchEvent>,
    config: DispatcherConfig,
}

impl Shared {
    fn tenant_semaphore(&self, tenant_id: &TenantId) -> Arc<Semaphore> {
        let mut slots = self.tenant_slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(tenant_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.per_tenant_limit)))
            .clone()
    }

    fn release(&self, id: &WorkOrderId) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    fn emit(&self, work_order_id: WorkOrderId, outcome: DispatchOutcome) {
        // No subscribers is fine
        let _ = self.events.send(DispatchEvent {
            work_order_id,
            outcome,
        });
    }
}

/// The scheduling front door. One instance per process.
pub struct Dispatcher {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Task>,
    stop_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start the worker pool immediately
    pub fn start(engine: Arc<ExecutionEngine>, config: DispatcherConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(config.queue_capacity);
        let (stop_tx, _) = watch::channel(false);
        let (events, _) = broadcast::channel(1024);

        let shared = Arc::new(Shared {
            engine,
            inflight: Mutex::new(HashSet::new()),
            tenant_slots: Mutex::new(HashMap::new()),
            events,
            config: config.clone(),
        });

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = Vec::with_capacity(config.worker_count);
        for worker in 0..config.worker_count {
            workers.push(tokio::spawn(worker_loop(
                worker,
                shared.clone(),
                rx.clone(),
                tx.clone(),
                stop_tx.subscribe(),
            )));
        }
        info!(workers = config.worker_count, "dispatcher started");

        Self {
            shared,
            tx,
            stop_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Schedule one advance for a work order.
    ///
    /// Returns `false` when the work order is already queued or running —
    /// the duplicate is coalesced, never run concurrently.
    pub async fn enqueue(
        &self,
        tenant_id: &TenantId,
        work_order_id: &WorkOrderId,
    ) -> Result<bool, DispatchError> {
        if *self.stop_tx.borrow() {
            return Err(DispatchError::Shutdown);
        }
        {
            let mut inflight = self
                .shared
                .inflight
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if !inflight.insert(work_order_id.clone()) {
                debug!(work_order = %work_order_id.short(), "enqueue coalesced");
                return Ok(false);
            }
        }

        let task = Task {
            tenant_id: tenant_id.clone(),
            work_order_id: work_order_id.clone(),
        };
        if self.tx.send(task).await.is_err() {
            self.shared.release(work_order_id);
            return Err(DispatchError::Shutdown);
        }
        Ok(true)
    }

    /// Subscribe to scheduling outcomes
    pub fn events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.shared.events.subscribe()
    }

    /// Stop accepting work, let in-flight advances finish, and join the
    /// workers. Tasks still queued are dropped.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for handle in workers {
            let _ = handle.await;
        }
        info!("dispatcher stopped");
    }
}

/// Put a task back on the queue without blocking the worker.
///
/// Workers are the queue's only consumers, so a worker that awaits `send`
/// on a full queue can deadlock the pool. A full queue hands the send to a
/// detached task instead; the work order stays in the in-flight set either
/// way. Returns `false` when the queue is closed.
fn requeue(tx: &mpsc::Sender<Task>, task: Task) -> bool {
    match tx.try_send(task) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(task)) => {
            let tx = tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(task).await;
            });
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    tx: mpsc::Sender<Task>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let task = {
            let mut queue = rx.lock().await;
            tokio::select! {
                _ = stop_rx.changed() => None,
                task = queue.recv() => task,
            }
        };
        let Some(task) = task else {
            debug!(worker, "worker exiting");
            break;
        };

        let semaphore = shared.tenant_semaphore(&task.tenant_id);
        // The semaphore is never closed, so acquisition cannot fail
        let _permit = semaphore.acquire_owned().await.ok();

        let outcome = shared
            .engine
            .advance(&task.tenant_id, &task.work_order_id)
            .await;
        drop(_permit);

        match outcome {
            Ok(AdvanceResult::Ready) => {
                shared.emit(task.work_order_id.clone(), DispatchOutcome::Requeued);
                // Still in the in-flight set; duplicates stay coalesced
                if !requeue(&tx, task) {
                    break;
                }
            }
            Ok(AdvanceResult::Suspended) => {
                shared.release(&task.work_order_id);
                shared.emit(task.work_order_id, DispatchOutcome::Suspended);
            }
            Ok(AdvanceResult::Terminal(stage)) => {
                shared.release(&task.work_order_id);
                shared.emit(task.work_order_id, DispatchOutcome::Terminal(stage));
            }
            Err(err) if matches!(err, WorkOrderError::ConcurrencyConflict { .. }) => {
                warn!(
                    worker,
                    work_order = %task.work_order_id.short(),
                    "advance raced a concurrent writer, re-enqueueing"
                );
                shared.emit(task.work_order_id.clone(), DispatchOutcome::Conflict);
                tokio::time::sleep(shared.config.conflict_retry_delay).await;
                if !requeue(&tx, task) {
                    break;
                }
            }
            Err(err) => {
                warn!(
                    worker,
                    work_order = %task.work_order_id.short(),
                    error = %err,
                    "advance failed"
                );
                shared.release(&task.work_order_id);
                shared.emit(task.work_order_id, DispatchOutcome::Error(err.to_string()));
            }
        }
    }
}
