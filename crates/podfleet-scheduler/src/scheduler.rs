//! Scheduler — the control loop that matches pending requests to pods.
//!
//! One driver task wakes on a fixed interval and whenever a request is
//! enqueued or a pod slot frees up. Each tick, per workflow with pending
//! requests:
//!
//! 1. find an eligible pod (running or paused, with a free slot);
//! 2. if there is none, create one unless a running pod already exists
//!    or a creation is in progress;
//! 3. resume the pod if paused, take as many requests as it has free
//!    slots, mark them processing and hand the batch to a dispatch task.
//!
//! Idle-timeout evaluation runs last, after all assignment decisions.
//! Ticks are serialized by a lock, so a manual `tick()` never races the
//! driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use podfleet_engine::EngineConnector;
use podfleet_provider::PodProvider;
use podfleet_state::{
    FleetConfig, Pod, PodStatus, QueueStatus, RequestId, RequestStatus, RequestStore,
    WorkflowRequest, epoch_secs, workflow_key,
};

use crate::error::{SchedulerError, SchedulerResult};
use crate::monitor::{CompletionHandler, JobMonitor};
use crate::notify::CompletionSink;
use crate::pool::{PodPool, PoolSettings};
use crate::queue::RequestQueue;
use crate::readiness::ReadinessGate;

/// Shared state reachable from the driver and from dispatch tasks.
#[derive(Clone)]
pub(crate) struct Core {
    pub(crate) store: RequestStore,
    pub(crate) queue: Arc<RequestQueue>,
    pub(crate) pool: Arc<PodPool>,
    pub(crate) monitor: Arc<JobMonitor>,
    pub(crate) connector: Arc<dyn EngineConnector>,
    pub(crate) gate: ReadinessGate,
    pub(crate) wake: Arc<Notify>,
    pub(crate) max_dispatch_attempts: u32,
    tick_lock: Arc<Mutex<()>>,
    tick_interval: Duration,
    stopping: Arc<AtomicBool>,
    dispatches: Arc<Mutex<JoinSet<()>>>,
}

struct DriverSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Pod scheduler with an explicit `start()`/`stop()` lifecycle.
pub struct Scheduler {
    core: Core,
    driver: Mutex<Option<DriverSlot>>,
}

impl Scheduler {
    pub fn new(
        config: &FleetConfig,
        provider: Arc<dyn PodProvider>,
        connector: Arc<dyn EngineConnector>,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        let store = RequestStore::new();
        let wake = Arc::new(Notify::new());
        let pool = Arc::new(PodPool::new(provider, PoolSettings::from_config(config)));
        let completion = CompletionHandler::new(store.clone(), pool.clone(), sink, wake.clone());
        let monitor = Arc::new(JobMonitor::new(config.monitor.clone(), completion));

        Self {
            core: Core {
                queue: Arc::new(RequestQueue::new(store.clone())),
                store,
                pool,
                monitor,
                connector,
                gate: ReadinessGate::new(config.readiness.clone()),
                wake,
                max_dispatch_attempts: config.scheduler.max_dispatch_attempts.max(1),
                tick_lock: Arc::new(Mutex::new(())),
                tick_interval: config.scheduler.tick_interval,
                stopping: Arc::new(AtomicBool::new(false)),
                dispatches: Arc::new(Mutex::new(JoinSet::new())),
            },
            driver: Mutex::new(None),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Spawn the driver task. Returns `false` if it is already running.
    pub async fn start(&self) -> bool {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return false;
        }
        self.core.stopping.store(false, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let core = self.core.clone();
        let handle = tokio::spawn(async move { core.run(shutdown_rx).await });
        *driver = Some(DriverSlot {
            handle,
            shutdown_tx,
        });

        info!(
            tick_interval_ms = self.core.tick_interval.as_millis() as u64,
            "scheduler started"
        );
        true
    }

    /// Wait for any in-progress tick, stop all dispatch tasks and
    /// monitors, return unfinished requests to their queues, pause every
    /// running pod, then stop the driver.
    ///
    /// A later `start()` picks the returned requests up again.
    pub async fn stop(&self) {
        self.core.stopping.store(true, Ordering::SeqCst);
        {
            let _tick = self.core.tick_lock.lock().await;
            {
                let mut dispatches = self.core.dispatches.lock().await;
                dispatches.abort_all();
                while dispatches.join_next().await.is_some() {}
            }
            self.core.monitor.stop_all().await;

            let now = epoch_secs();
            self.core.return_unfinished(now).await;
            self.core.pool.pause_all(now).await;
        }

        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            let _ = driver.shutdown_tx.send(true);
            if let Err(e) = driver.handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "scheduler driver ended abnormally");
                }
            }
        }
        info!("scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.driver.lock().await.is_some() && !self.core.stopping.load(Ordering::SeqCst)
    }

    // ── Caller surface ─────────────────────────────────────────────

    /// Queue a request and wake the driver. Returns immediately.
    pub async fn enqueue(&self, workflow_name: &str, parameters: Value) -> SchedulerResult<RequestId> {
        if workflow_key(workflow_name).is_empty() {
            return Err(SchedulerError::InvalidRequest(
                "workflow name must not be empty".to_string(),
            ));
        }
        let id = self
            .core
            .queue
            .enqueue(workflow_name, parameters, epoch_secs())
            .await;
        self.core.wake.notify_one();
        Ok(id)
    }

    pub fn get_request(&self, id: &RequestId) -> Option<WorkflowRequest> {
        self.core.store.get(id)
    }

    pub async fn queue_status(&self) -> QueueStatus {
        QueueStatus {
            active_pods: self.core.pool.active_count().await,
            pending_by_workflow: self.core.queue.pending_by_workflow().await,
            running: self.is_running().await,
        }
    }

    pub async fn get_pod(&self, pod_id: &str) -> Option<Pod> {
        self.core.pool.get(pod_id).await
    }

    pub async fn list_pods(&self) -> Vec<Pod> {
        self.core.pool.snapshot().await
    }

    /// Run one scheduling pass now.
    pub async fn tick(&self) {
        self.core.tick_at(epoch_secs()).await;
    }

    /// Run one scheduling pass with an explicit clock.
    pub async fn tick_at(&self, now: u64) {
        self.core.tick_at(now).await;
    }

    /// Evaluate idle timeouts only.
    pub async fn evaluate_timeouts(&self, now: u64) {
        let _tick = self.core.tick_lock.lock().await;
        self.core.pool.evaluate_timeouts(now).await;
    }
}

impl Core {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("scheduler driver starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
                _ = shutdown.changed() => {
                    debug!("scheduler driver shutting down");
                    break;
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick_at(epoch_secs()).await;
        }
    }

    pub(crate) async fn tick_at(&self, now: u64) {
        let _tick = self.tick_lock.lock().await;
        if self.stopping.load(Ordering::SeqCst) {
            return;
        }

        for workflow in self.queue.workflows_with_pending().await {
            self.schedule_workflow(&workflow, now).await;
        }

        self.pool.evaluate_timeouts(now).await;
    }

    async fn schedule_workflow(&self, workflow: &str, now: u64) {
        let pod = match self.pool.find_eligible(workflow).await {
            Some(pod) => pod,
            None => {
                if self.pool.has_running_or_creating(workflow).await {
                    debug!(%workflow, "no free slot, waiting for running pod");
                    return;
                }
                match self.pool.create_pod(workflow, now).await {
                    Ok(pod) => pod,
                    Err(e) => {
                        warn!(%workflow, error = %e, "could not provision pod, requests stay pending");
                        self.note_pending_error(workflow, &e.to_string()).await;
                        return;
                    }
                }
            }
        };

        if pod.status == PodStatus::Paused {
            if let Err(e) = self.pool.resume(&pod.id, now).await {
                warn!(pod_id = %pod.id, %workflow, error = %e, "failed to resume pod");
                return;
            }
        }

        let free = pod.free_slots(self.pool.settings().max_in_flight);
        let ids = self.queue.take(workflow, free).await;
        if ids.is_empty() {
            return;
        }

        let batch: Vec<RequestId> = ids
            .into_iter()
            .filter(|id| {
                self.store
                    .update(id, |r| r.mark_processing(&pod.id))
                    .is_some()
            })
            .collect();
        if batch.is_empty() {
            return;
        }

        if let Err(e) = self.pool.assign(&pod.id, &batch, now).await {
            warn!(pod_id = %pod.id, error = %e, "pod vanished before assignment");
            for id in &batch {
                self.store.update(id, |r| r.mark_pending(e.to_string()));
            }
            self.queue.requeue_front(workflow, &batch).await;
            return;
        }

        info!(pod_id = %pod.id, %workflow, count = batch.len(), "requests assigned");
        let core = self.clone();
        let pod_id = pod.id.clone();
        let workflow = workflow.to_string();
        let mut dispatches = self.dispatches.lock().await;
        while dispatches.try_join_next().is_some() {}
        dispatches.spawn(async move { core.dispatch(pod_id, workflow, batch).await });
    }

    /// Put every pending or processing request back at the head of its
    /// queue, freeing the slots held by interrupted ones.
    async fn return_unfinished(&self, now: u64) {
        let mut by_workflow: BTreeMap<String, Vec<RequestId>> = BTreeMap::new();
        let mut interrupted = 0;
        for request in self.store.unfinished() {
            if request.status == RequestStatus::Processing {
                if let Some(pod_id) = &request.assigned_pod_id {
                    self.pool.release(pod_id, &[request.id], now).await;
                }
                let updated = self.store.update(&request.id, |r| {
                    r.mark_interrupted("scheduler stopped before the job finished")
                });
                if updated.is_none() {
                    continue;
                }
                interrupted += 1;
            }
            by_workflow
                .entry(request.workflow_name)
                .or_default()
                .push(request.id);
        }

        for (workflow, ids) in &by_workflow {
            self.queue.requeue_front(workflow, ids).await;
        }
        if interrupted > 0 {
            info!(count = interrupted, "in-flight requests returned to the queue");
        }
    }

    /// Record why the workflow's requests are still waiting.
    async fn note_pending_error(&self, workflow: &str, error: &str) {
        for id in self.queue.pending_ids(workflow).await {
            self.store.update(&id, |r| r.error = Some(error.to_string()));
        }
    }
}
