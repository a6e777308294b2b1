//! Dispatch — hands an assigned batch to the pod's engine.
//!
//! Runs as a spawned task off the driver. The first batch for a new or
//! resumed pod establishes readiness; later batches reuse it through the
//! pod's readiness cell.

use tracing::{debug, info, warn};

use podfleet_state::{FailureKind, PodId, RequestId, epoch_secs};

use crate::error::{SchedulerError, SchedulerResult};
use crate::monitor::JobOutcome;
use crate::scheduler::Core;

impl Core {
    pub(crate) async fn dispatch(self, pod_id: PodId, workflow: String, batch: Vec<RequestId>) {
        let address = match self.ensure_ready(&pod_id).await {
            Ok(address) => address,
            Err(e) => {
                self.handle_unready(&pod_id, &workflow, batch, e).await;
                return;
            }
        };

        let engine = self.connector.connect(&address);
        for request_id in batch {
            let Some(request) = self.store.get(&request_id) else {
                continue;
            };

            match engine.submit(&workflow, &request.parameters).await {
                Ok(job_id) => {
                    self.store
                        .update(&request_id, |r| r.job_id = Some(job_id.clone()));
                    info!(%request_id, %pod_id, %job_id, "request dispatched");
                    self.monitor
                        .start(request_id, &pod_id, job_id, engine.clone())
                        .await;
                }
                Err(e) => {
                    self.monitor
                        .completion()
                        .settle(
                            request_id,
                            &pod_id,
                            JobOutcome::Failed(
                                FailureKind::Dispatch,
                                format!("job submission failed: {e}"),
                            ),
                        )
                        .await;
                }
            }
        }
    }

    /// Address of a pod whose engine has answered a health probe.
    async fn ensure_ready(&self, pod_id: &str) -> SchedulerResult<String> {
        let cell = self
            .pool
            .readiness_cell(pod_id)
            .await
            .ok_or_else(|| SchedulerError::PodNotFound(pod_id.to_string()))?;

        let address = cell
            .get_or_try_init(|| self.gate.wait_ready(&self.pool, self.connector.as_ref(), pod_id))
            .await?;
        Ok(address.clone())
    }

    /// Return a batch to its queue after the pod failed the readiness gate.
    ///
    /// Requests that exhausted their dispatch attempts are failed instead.
    /// A pod the provider reports as gone leaves the pool, and any other
    /// requests still monitored on it are returned as well.
    async fn handle_unready(
        &self,
        pod_id: &str,
        workflow: &str,
        mut batch: Vec<RequestId>,
        error: SchedulerError,
    ) {
        let now = epoch_secs();
        warn!(%pod_id, %workflow, error = %error, count = batch.len(), "pod not ready, returning requests");

        if error.is_pod_lost() {
            for id in self.monitor.cancel_for_pod(pod_id).await {
                if !batch.contains(&id) {
                    batch.push(id);
                }
            }
            self.pool.remove(pod_id).await;
        } else {
            self.pool.release(pod_id, &batch, now).await;
        }

        let reason = error.to_string();
        let mut requeue = Vec::with_capacity(batch.len());
        for request_id in batch {
            let Some(request) = self.store.get(&request_id) else {
                continue;
            };
            if request.status.is_terminal() {
                continue;
            }
            if request.dispatch_attempts + 1 >= self.max_dispatch_attempts {
                let message = format!(
                    "pod not ready after {} dispatch attempts: {reason}",
                    request.dispatch_attempts + 1
                );
                self.monitor
                    .completion()
                    .fail_unassigned(request_id, FailureKind::Readiness, &message)
                    .await;
            } else if self
                .store
                .update(&request_id, |r| r.mark_pending(reason.clone()))
                .is_some()
            {
                requeue.push(request_id);
            }
        }

        debug!(%workflow, count = requeue.len(), "requests requeued after readiness failure");
        self.queue.requeue_front(workflow, &requeue).await;
        self.wake.notify_one();
    }
}
