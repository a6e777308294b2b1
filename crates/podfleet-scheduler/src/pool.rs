//! Pod pool and lifecycle manager.
//!
//! Tracks every pod the scheduler leased, decides which one may take more
//! work, and drives the `running → paused → terminated` lifecycle through
//! the [`PodProvider`]. Local state only changes after the provider call
//! it depends on succeeded; failed provider calls leave the pod as it was.
//!
//! Locks are never held across provider calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use podfleet_provider::{PodCreateRequest, PodProvider, ProviderPodStatus};
use podfleet_state::config::PodTemplate;
use podfleet_state::{
    FleetConfig, Pod, PodId, PodStatus, RequestId, WorkflowPolicies, workflow_key,
};

use crate::error::{SchedulerError, SchedulerResult};

/// Engine address, set once the pod passed the readiness gate.
pub type ReadinessCell = Arc<OnceCell<String>>;

/// Pool sizing and provisioning parameters.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_in_flight: usize,
    pub create_attempts: u32,
    pub create_retry_delay: Duration,
    pub template: PodTemplate,
    pub policies: WorkflowPolicies,
}

impl PoolSettings {
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            max_in_flight: config.scheduler.max_in_flight,
            create_attempts: config.scheduler.create_attempts,
            create_retry_delay: config.scheduler.create_retry_delay,
            template: config.pod_template.clone(),
            policies: config.policies(),
        }
    }
}

struct PodEntry {
    pod: Pod,
    readiness: ReadinessCell,
}

impl PodEntry {
    fn new(pod: Pod) -> Self {
        Self {
            pod,
            readiness: Arc::new(OnceCell::new()),
        }
    }

    fn reset_readiness(&mut self) {
        self.readiness = Arc::new(OnceCell::new());
        self.pod.network_address = None;
    }
}

pub struct PodPool {
    provider: Arc<dyn PodProvider>,
    settings: PoolSettings,
    pods: RwLock<HashMap<PodId, PodEntry>>,
    /// Workflows with a provider create call in progress.
    creating: RwLock<HashSet<String>>,
}

impl PodPool {
    pub fn new(provider: Arc<dyn PodProvider>, settings: PoolSettings) -> Self {
        Self {
            provider,
            settings,
            pods: RwLock::new(HashMap::new()),
            creating: RwLock::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    // ── Queries ────────────────────────────────────────────────────

    /// A running or paused pod of `workflow_name` with a free slot.
    ///
    /// Running pods are preferred over paused ones, then the oldest pod.
    pub async fn find_eligible(&self, workflow_name: &str) -> Option<Pod> {
        let key = workflow_key(workflow_name);
        let pods = self.pods.read().await;
        pods.values()
            .map(|e| &e.pod)
            .filter(|p| p.is_eligible_for(&key, self.settings.max_in_flight))
            .min_by(|a, b| {
                (a.status != PodStatus::Running, a.created_at, &a.id).cmp(&(
                    b.status != PodStatus::Running,
                    b.created_at,
                    &b.id,
                ))
            })
            .cloned()
    }

    /// Whether a running pod exists or is being created for the workflow.
    pub async fn has_running_or_creating(&self, workflow_name: &str) -> bool {
        let key = workflow_key(workflow_name);
        if self.creating.read().await.contains(&key) {
            return true;
        }
        let pods = self.pods.read().await;
        pods.values()
            .any(|e| e.pod.workflow_name == key && e.pod.status == PodStatus::Running)
    }

    pub async fn get(&self, pod_id: &str) -> Option<Pod> {
        self.pods.read().await.get(pod_id).map(|e| e.pod.clone())
    }

    /// All pods, oldest first.
    pub async fn snapshot(&self) -> Vec<Pod> {
        let pods = self.pods.read().await;
        let mut all: Vec<Pod> = pods.values().map(|e| e.pod.clone()).collect();
        all.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        all
    }

    /// Pods that are running or paused.
    pub async fn active_count(&self) -> usize {
        self.pods
            .read()
            .await
            .values()
            .filter(|e| matches!(e.pod.status, PodStatus::Running | PodStatus::Paused))
            .count()
    }

    pub async fn readiness_cell(&self, pod_id: &str) -> Option<ReadinessCell> {
        self.pods
            .read()
            .await
            .get(pod_id)
            .map(|e| e.readiness.clone())
    }

    // ── Provisioning ───────────────────────────────────────────────

    /// Lease a new pod for the workflow.
    ///
    /// Refuses with [`SchedulerError::AlreadyRunning`] while a running pod
    /// exists or another creation for the workflow is in progress.
    pub async fn create_pod(&self, workflow_name: &str, now: u64) -> SchedulerResult<Pod> {
        let key = workflow_key(workflow_name);
        {
            let mut creating = self.creating.write().await;
            let running = self
                .pods
                .read()
                .await
                .values()
                .any(|e| e.pod.workflow_name == key && e.pod.status == PodStatus::Running);
            if running || !creating.insert(key.clone()) {
                return Err(SchedulerError::AlreadyRunning(key));
            }
        }

        let result = self.provision(&key, now).await;
        self.creating.write().await.remove(&key);
        result
    }

    async fn provision(&self, workflow: &str, now: u64) -> SchedulerResult<Pod> {
        let policy = self.settings.policies.for_workflow(workflow).clone();
        let request = self.create_request(workflow, policy.network_volume.clone());
        let attempts = self.settings.create_attempts.max(1);

        let mut attempt = 1;
        let created = loop {
            match self.provider.create(&request).await {
                Ok(created) => break created,
                Err(e) if attempt < attempts => {
                    warn!(%workflow, attempt, error = %e, "pod creation failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.settings.create_retry_delay).await;
                }
                Err(e) => {
                    return Err(SchedulerError::Provisioning {
                        workflow: workflow.to_string(),
                        source: e,
                    });
                }
            }
        };

        let pod = Pod::new(created.id, workflow, &policy, now);
        self.pods
            .write()
            .await
            .insert(pod.id.clone(), PodEntry::new(pod.clone()));
        info!(pod_id = %pod.id, %workflow, attempt, "pod created");
        Ok(pod)
    }

    fn create_request(&self, workflow: &str, network_volume: Option<String>) -> PodCreateRequest {
        let template = &self.settings.template;
        PodCreateRequest {
            name: format!("{}-{}", template.name_prefix, workflow),
            image_name: template.image_name.clone(),
            gpu_type_ids: template.gpu_type_ids.clone(),
            gpu_count: template.gpu_count,
            cloud_type: template.cloud_type.clone(),
            container_disk_gb: template.container_disk_gb,
            volume_gb: template.volume_gb,
            volume_mount_path: template.volume_mount_path.clone(),
            ports: template.ports.clone(),
            env: template.env.clone(),
            network_volume_id: network_volume,
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start a paused pod. A running pod is left untouched.
    pub async fn resume(&self, pod_id: &str, now: u64) -> SchedulerResult<()> {
        let status = self
            .get(pod_id)
            .await
            .map(|p| p.status)
            .ok_or_else(|| SchedulerError::PodNotFound(pod_id.to_string()))?;
        if status != PodStatus::Paused {
            return Ok(());
        }

        self.provider
            .start(pod_id)
            .await
            .map_err(|e| SchedulerError::Provider {
                pod_id: pod_id.to_string(),
                source: e,
            })?;

        let mut pods = self.pods.write().await;
        let entry = pods
            .get_mut(pod_id)
            .ok_or_else(|| SchedulerError::PodNotFound(pod_id.to_string()))?;
        entry.pod.status = PodStatus::Running;
        entry.pod.paused_at = None;
        let policy = self.settings.policies.for_workflow(&entry.pod.workflow_name);
        entry.pod.touch(policy, now);
        entry.reset_readiness();
        info!(%pod_id, workflow = %entry.pod.workflow_name, "pod resumed");
        Ok(())
    }

    /// Pause idle pods past their pause deadline and terminate paused pods
    /// past their terminate deadline.
    ///
    /// Candidates are chosen from one snapshot, so a pod paused here is not
    /// terminated in the same call. Provider failures are logged and the
    /// pod keeps its prior state.
    pub async fn evaluate_timeouts(&self, now: u64) {
        let (to_pause, to_terminate): (Vec<PodId>, Vec<PodId>) = {
            let pods = self.pods.read().await;
            let pause = pods
                .values()
                .filter(|e| e.pod.should_pause(now))
                .map(|e| e.pod.id.clone())
                .collect();
            let terminate = pods
                .values()
                .filter(|e| e.pod.should_terminate(now))
                .map(|e| e.pod.id.clone())
                .collect();
            (pause, terminate)
        };

        for pod_id in to_pause {
            if let Err(e) = self.provider.stop(&pod_id).await {
                warn!(%pod_id, error = %e, "failed to pause idle pod");
                continue;
            }
            let mut pods = self.pods.write().await;
            if let Some(entry) = pods.get_mut(&pod_id) {
                entry.pod.status = PodStatus::Paused;
                entry.pod.paused_at = Some(now);
                entry.reset_readiness();
                info!(%pod_id, workflow = %entry.pod.workflow_name, "idle pod paused");
            }
        }

        for pod_id in to_terminate {
            match self.provider.terminate(&pod_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(%pod_id, "pod already gone at provider");
                }
                Err(e) => {
                    warn!(%pod_id, error = %e, "failed to terminate paused pod");
                    continue;
                }
            }
            if let Some(entry) = self.pods.write().await.remove(&pod_id) {
                info!(%pod_id, workflow = %entry.pod.workflow_name, "paused pod terminated");
            }
        }
    }

    /// Poll the provider until the pod is running with an address.
    ///
    /// The address is recorded on the pod. A terminal provider status
    /// aborts immediately with [`SchedulerError::PodFailed`].
    pub async fn wait_for_reachable_address(
        &self,
        pod_id: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> SchedulerResult<String> {
        for attempt in 1..=max_attempts {
            match self.provider.describe(pod_id).await {
                Ok(desc) if desc.is_reachable() => {
                    if let Some(address) = desc.network_address {
                        if let Some(entry) = self.pods.write().await.get_mut(pod_id) {
                            entry.pod.network_address = Some(address.clone());
                        }
                        debug!(%pod_id, %address, attempt, "pod reachable");
                        return Ok(address);
                    }
                }
                Ok(desc) if desc.status.is_terminal() => {
                    return Err(SchedulerError::PodFailed {
                        pod_id: pod_id.to_string(),
                        status: desc.status,
                    });
                }
                Ok(desc) => {
                    debug!(%pod_id, status = %desc.status, attempt, "pod not reachable yet");
                }
                Err(e) if e.is_not_found() => {
                    return Err(SchedulerError::PodFailed {
                        pod_id: pod_id.to_string(),
                        status: ProviderPodStatus::Terminated,
                    });
                }
                Err(e) => {
                    debug!(%pod_id, attempt, error = %e, "describe failed");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(SchedulerError::AddressTimeout {
            pod_id: pod_id.to_string(),
            attempts: max_attempts,
        })
    }

    /// Pause every running pod. Returns how many were paused.
    pub async fn pause_all(&self, now: u64) -> usize {
        let running: Vec<PodId> = {
            let pods = self.pods.read().await;
            pods.values()
                .filter(|e| e.pod.status == PodStatus::Running)
                .map(|e| e.pod.id.clone())
                .collect()
        };

        let mut paused = 0;
        for pod_id in running {
            if let Err(e) = self.provider.stop(&pod_id).await {
                warn!(%pod_id, error = %e, "failed to pause pod during shutdown");
                continue;
            }
            if let Some(entry) = self.pods.write().await.get_mut(&pod_id) {
                entry.pod.status = PodStatus::Paused;
                entry.pod.paused_at = Some(now);
                entry.reset_readiness();
                paused += 1;
            }
        }
        info!(paused, "running pods paused");
        paused
    }

    // ── Slots ──────────────────────────────────────────────────────

    /// Record requests as in flight on a pod and refresh its deadlines.
    pub async fn assign(&self, pod_id: &str, ids: &[RequestId], now: u64) -> SchedulerResult<()> {
        let mut pods = self.pods.write().await;
        let entry = pods
            .get_mut(pod_id)
            .ok_or_else(|| SchedulerError::PodNotFound(pod_id.to_string()))?;
        entry.pod.in_flight.extend_from_slice(ids);
        let policy = self.settings.policies.for_workflow(&entry.pod.workflow_name);
        entry.pod.touch(policy, now);
        Ok(())
    }

    /// Free the slots held by `ids` and refresh the pod's deadlines.
    ///
    /// Returns `false` if the pod is no longer in the pool.
    pub async fn release(&self, pod_id: &str, ids: &[RequestId], now: u64) -> bool {
        let mut pods = self.pods.write().await;
        let Some(entry) = pods.get_mut(pod_id) else {
            return false;
        };
        entry.pod.in_flight.retain(|id| !ids.contains(id));
        let policy = self.settings.policies.for_workflow(&entry.pod.workflow_name);
        entry.pod.touch(policy, now);
        debug!(%pod_id, in_flight = entry.pod.in_flight.len(), "slots released");
        true
    }

    pub async fn remove(&self, pod_id: &str) -> Option<Pod> {
        let removed = self.pods.write().await.remove(pod_id).map(|e| e.pod);
        if let Some(pod) = &removed {
            info!(%pod_id, workflow = %pod.workflow_name, "pod removed from pool");
        }
        removed
    }
}
