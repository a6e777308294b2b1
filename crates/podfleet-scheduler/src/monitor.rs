//! Job completion monitor — background task per dispatched request.
//!
//! Each task waits `initial_delay`, then polls the engine's history every
//! `poll_interval` until the job reaches a terminal state or the attempt
//! budget runs out. Outcomes are settled through [`CompletionHandler`],
//! which updates the request, frees the pod slot, wakes the scheduler and
//! notifies the sink.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use podfleet_engine::{EngineClient, JobState};
use podfleet_state::config::MonitorSettings;
use podfleet_state::{FailureKind, PodId, RequestId, RequestStore, epoch_secs};

use crate::notify::CompletionSink;
use crate::pool::PodPool;

/// Terminal outcome of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Value),
    Failed(FailureKind, String),
}

/// Applies terminal outcomes.
#[derive(Clone)]
pub struct CompletionHandler {
    store: RequestStore,
    pool: Arc<PodPool>,
    sink: Arc<dyn CompletionSink>,
    wake: Arc<Notify>,
}

impl CompletionHandler {
    pub fn new(
        store: RequestStore,
        pool: Arc<PodPool>,
        sink: Arc<dyn CompletionSink>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            pool,
            sink,
            wake,
        }
    }

    /// Record the outcome, free the request's slot on `pod_id`, and notify.
    ///
    /// A request that is already terminal is left alone and not reported
    /// again.
    pub async fn settle(&self, request_id: RequestId, pod_id: &str, outcome: JobOutcome) {
        let now = epoch_secs();
        // The slot is free before the request is observably terminal.
        self.pool.release(pod_id, &[request_id], now).await;

        let updated = match &outcome {
            JobOutcome::Completed(result) => self
                .store
                .update(&request_id, |r| r.mark_completed(result.clone(), now)),
            JobOutcome::Failed(kind, error) => self
                .store
                .update(&request_id, |r| r.mark_failed(*kind, error.clone(), now)),
        };

        self.wake.notify_one();

        if updated.is_none() {
            debug!(%request_id, "request already settled");
            return;
        }

        match outcome {
            JobOutcome::Completed(result) => {
                info!(%request_id, %pod_id, "request completed");
                self.sink.notify_completed(request_id, &result).await;
            }
            JobOutcome::Failed(kind, error) => {
                warn!(%request_id, %pod_id, %kind, %error, "request failed");
                self.sink.notify_failed(request_id, &error).await;
            }
        }
    }

    /// Report a failure for a request that holds no pod slot.
    pub async fn fail_unassigned(&self, request_id: RequestId, kind: FailureKind, error: &str) {
        let now = epoch_secs();
        if self
            .store
            .update(&request_id, |r| r.mark_failed(kind, error, now))
            .is_some()
        {
            warn!(%request_id, %kind, %error, "request failed");
            self.sink.notify_failed(request_id, error).await;
        }
    }
}

/// Per-request monitor state.
struct MonitorSlot {
    pod_id: PodId,
    /// Distinguishes a restarted monitor from the task it replaced.
    generation: u64,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl MonitorSlot {
    /// Signal the task to stop polling. A task already settling its
    /// outcome runs to completion.
    fn cancel(self) -> JoinHandle<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle
    }
}

/// Tracks one polling task per dispatched request.
pub struct JobMonitor {
    settings: MonitorSettings,
    completion: CompletionHandler,
    /// Active monitors: request_id → slot.
    monitors: Arc<RwLock<HashMap<RequestId, MonitorSlot>>>,
    next_generation: AtomicU64,
}

impl JobMonitor {
    pub fn new(settings: MonitorSettings, completion: CompletionHandler) -> Self {
        Self {
            settings,
            completion,
            monitors: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn completion(&self) -> &CompletionHandler {
        &self.completion
    }

    /// Start polling `job_id` for a request dispatched to `pod_id`.
    pub async fn start(
        &self,
        request_id: RequestId,
        pod_id: &str,
        job_id: String,
        engine: Arc<dyn EngineClient>,
    ) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = self.settings.clone();
        let completion = self.completion.clone();
        let registry = self.monitors.clone();
        let pod = pod_id.to_string();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        // Hold the registry lock until the slot is inserted so the task's
        // own removal cannot run first.
        let mut monitors = self.monitors.write().await;
        let handle = tokio::spawn(async move {
            if let Some(outcome) = poll_job(engine.as_ref(), &job_id, &settings, shutdown_rx).await {
                completion.settle(request_id, &pod, outcome).await;
            }
            let mut monitors = registry.write().await;
            if monitors
                .get(&request_id)
                .is_some_and(|slot| slot.generation == generation)
            {
                monitors.remove(&request_id);
            }
        });

        let slot = MonitorSlot {
            pod_id: pod_id.to_string(),
            generation,
            handle,
            shutdown_tx,
        };
        if let Some(old) = monitors.insert(request_id, slot) {
            let _ = old.cancel();
        }
        debug!(%request_id, %pod_id, "job monitor started");
    }

    /// Stop every monitor for requests on `pod_id`. Returns their ids.
    pub async fn cancel_for_pod(&self, pod_id: &str) -> Vec<RequestId> {
        let mut monitors = self.monitors.write().await;
        let ids: Vec<RequestId> = monitors
            .iter()
            .filter(|(_, slot)| slot.pod_id == pod_id)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some(slot) = monitors.remove(id) {
                let _ = slot.cancel();
            }
        }
        if !ids.is_empty() {
            info!(%pod_id, count = ids.len(), "job monitors cancelled");
        }
        ids
    }

    /// Stop all monitors and wait for their tasks to exit.
    pub async fn stop_all(&self) {
        let slots: Vec<(RequestId, MonitorSlot)> = self.monitors.write().await.drain().collect();
        let count = slots.len();
        let handles: Vec<(RequestId, JoinHandle<()>)> = slots
            .into_iter()
            .map(|(request_id, slot)| (request_id, slot.cancel()))
            .collect();

        for (request_id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(%request_id, error = %e, "job monitor ended abnormally");
            }
        }
        info!(count, "all job monitors stopped");
    }
}

/// Poll until terminal. Returns `None` if shut down first.
async fn poll_job(
    engine: &dyn EngineClient,
    job_id: &str,
    settings: &MonitorSettings,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JobOutcome> {
    if !sleep_or_shutdown(settings.initial_delay, &mut shutdown).await {
        return None;
    }

    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let polled = tokio::select! {
            polled = engine.get_history(job_id) => polled,
            _ = shutdown.changed() => return None,
        };
        match polled {
            Ok(Some(history)) => match history.state {
                JobState::Completed => {
                    let assets: Vec<String> =
                        history.outputs.iter().map(|a| engine.asset_url(a)).collect();
                    return Some(JobOutcome::Completed(json!({
                        "job_id": job_id,
                        "assets": assets,
                    })));
                }
                JobState::Failed(message) => {
                    return Some(JobOutcome::Failed(FailureKind::Engine, message));
                }
                state => debug!(%job_id, attempt, ?state, "job not finished"),
            },
            Ok(None) => debug!(%job_id, attempt, "job not visible yet"),
            Err(e) => debug!(%job_id, attempt, error = %e, "history poll failed"),
        }

        if attempt >= max_attempts {
            return Some(JobOutcome::Failed(
                FailureKind::Timeout,
                format!("job {job_id} did not finish after {max_attempts} status checks"),
            ));
        }
        attempt += 1;

        if !sleep_or_shutdown(settings.poll_interval, &mut shutdown).await {
            return None;
        }
    }
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}
