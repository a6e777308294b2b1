//! Domain types for podfleet.
//!
//! These types represent workflow requests, the pods that serve them, and
//! the idle-timeout policies that drive pod lifecycle transitions. All
//! types are serializable to JSON so the API can return them unchanged.
//! Timestamps are unix seconds.

use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a workflow request, generated at enqueue time.
pub type RequestId = Uuid;

/// Provider-assigned identifier for a pod.
pub type PodId = String;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Normalize a workflow name into the key used for queueing and pod affinity.
pub fn workflow_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ── Workflow requests ──────────────────────────────────────────────

/// Lifecycle status of a workflow request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Completed and failed requests never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

/// Why a request ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The pod or its engine never became reachable.
    Readiness,
    /// The engine rejected the job submission.
    Dispatch,
    /// The engine reported the job as failed.
    Engine,
    /// The job did not reach a terminal state within the poll budget.
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Readiness => write!(f, "readiness"),
            FailureKind::Dispatch => write!(f, "dispatch"),
            FailureKind::Engine => write!(f, "engine"),
            FailureKind::Timeout => write!(f, "timeout"),
        }
    }
}

/// One unit of work: a named workflow plus its opaque parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowRequest {
    pub id: RequestId,
    /// Lower-cased workflow name (see [`workflow_key`]).
    pub workflow_name: String,
    /// Forwarded to the engine untouched.
    pub parameters: serde_json::Value,
    pub enqueued_at: u64,
    pub status: RequestStatus,
    pub assigned_pod_id: Option<PodId>,
    /// Engine-assigned job id, set once the engine accepts the submission.
    pub job_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Number of times the request was handed back from an unreachable pod.
    pub dispatch_attempts: u32,
    pub completed_at: Option<u64>,
}

impl WorkflowRequest {
    /// Create a new pending request.
    pub fn new(workflow_name: &str, parameters: serde_json::Value, now: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_name: workflow_key(workflow_name),
            parameters,
            enqueued_at: now,
            status: RequestStatus::Pending,
            assigned_pod_id: None,
            job_id: None,
            result: None,
            error: None,
            failure: None,
            dispatch_attempts: 0,
            completed_at: None,
        }
    }

    /// Mark the request as handed to a pod.
    pub fn mark_processing(&mut self, pod_id: &str) {
        self.status = RequestStatus::Processing;
        self.assigned_pod_id = Some(pod_id.to_string());
        self.error = None;
    }

    /// Return the request to the queue after its pod could not take it.
    pub fn mark_pending(&mut self, reason: impl Into<String>) {
        self.status = RequestStatus::Pending;
        self.assigned_pod_id = None;
        self.job_id = None;
        self.error = Some(reason.into());
        self.dispatch_attempts += 1;
    }

    /// Return the request to the queue because the scheduler stopped while
    /// it was in flight. Does not count as a dispatch attempt.
    pub fn mark_interrupted(&mut self, reason: impl Into<String>) {
        self.status = RequestStatus::Pending;
        self.assigned_pod_id = None;
        self.job_id = None;
        self.error = Some(reason.into());
    }

    pub fn mark_completed(&mut self, result: serde_json::Value, now: u64) {
        self.status = RequestStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.failure = None;
        self.completed_at = Some(now);
    }

    pub fn mark_failed(&mut self, kind: FailureKind, error: impl Into<String>, now: u64) {
        self.status = RequestStatus::Failed;
        self.error = Some(error.into());
        self.failure = Some(kind);
        self.completed_at = Some(now);
    }
}

// ── Pods ───────────────────────────────────────────────────────────

/// Lifecycle status of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodStatus {
    Running,
    Paused,
    Terminated,
}

/// One leased compute worker serving a single workflow type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    pub id: PodId,
    pub workflow_name: String,
    pub status: PodStatus,
    pub created_at: u64,
    pub last_used_at: u64,
    /// An idle running pod is paused once `now` passes this.
    pub pause_deadline: u64,
    /// A paused pod is terminated once `now` passes this.
    pub terminate_deadline: u64,
    pub paused_at: Option<u64>,
    /// Requests currently dispatched to this pod.
    pub in_flight: Vec<RequestId>,
    /// Last `host:port` the provider reported for the engine.
    pub network_address: Option<String>,
}

impl Pod {
    /// Create a freshly provisioned, running pod.
    pub fn new(id: impl Into<PodId>, workflow_name: &str, policy: &TimeoutPolicy, now: u64) -> Self {
        let mut pod = Self {
            id: id.into(),
            workflow_name: workflow_key(workflow_name),
            status: PodStatus::Running,
            created_at: now,
            last_used_at: now,
            pause_deadline: 0,
            terminate_deadline: 0,
            paused_at: None,
            in_flight: Vec::new(),
            network_address: None,
        };
        pod.touch(policy, now);
        pod
    }

    /// Refresh `last_used_at` and recompute both deadlines from the policy.
    pub fn touch(&mut self, policy: &TimeoutPolicy, now: u64) {
        self.last_used_at = now;
        self.pause_deadline = now + policy.pause_seconds;
        self.terminate_deadline = now + policy.terminate_seconds;
    }

    /// Whether the pod can take another request.
    pub fn has_capacity(&self, max_in_flight: usize) -> bool {
        self.status != PodStatus::Terminated && self.in_flight.len() < max_in_flight
    }

    /// Running or paused pods of the given workflow with a free slot.
    pub fn is_eligible_for(&self, workflow_name: &str, max_in_flight: usize) -> bool {
        self.workflow_name == workflow_name
            && matches!(self.status, PodStatus::Running | PodStatus::Paused)
            && self.has_capacity(max_in_flight)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn should_pause(&self, now: u64) -> bool {
        self.status == PodStatus::Running && self.is_idle() && now > self.pause_deadline
    }

    pub fn should_terminate(&self, now: u64) -> bool {
        self.status == PodStatus::Paused && now > self.terminate_deadline
    }

    /// Number of free request slots.
    pub fn free_slots(&self, max_in_flight: usize) -> usize {
        max_in_flight.saturating_sub(self.in_flight.len())
    }
}

// ── Timeout policies ───────────────────────────────────────────────

/// Idle timeouts for pods serving one workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Idle seconds before a running pod is paused.
    pub pause_seconds: u64,
    /// Idle seconds before a paused pod is terminated.
    pub terminate_seconds: u64,
    /// Provider network volume attached to new pods for this workflow.
    pub network_volume: Option<String>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            pause_seconds: 300,
            terminate_seconds: 3600,
            network_volume: None,
        }
    }
}

/// Per-workflow timeout policies with a fallback default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowPolicies {
    default: TimeoutPolicy,
    workflows: HashMap<String, TimeoutPolicy>,
}

impl WorkflowPolicies {
    pub fn new(default: TimeoutPolicy, workflows: HashMap<String, TimeoutPolicy>) -> Self {
        let workflows = workflows
            .into_iter()
            .map(|(name, policy)| (workflow_key(&name), policy))
            .collect();
        Self { default, workflows }
    }

    /// The policy for a workflow, or the default when it has no entry.
    pub fn for_workflow(&self, workflow_name: &str) -> &TimeoutPolicy {
        self.workflows
            .get(&workflow_key(workflow_name))
            .unwrap_or(&self.default)
    }
}

// ── Status ─────────────────────────────────────────────────────────

/// Point-in-time view of the scheduler for callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueStatus {
    /// Pods that are running or paused.
    pub active_pods: usize,
    /// Pending request count per workflow (workflows with an empty queue omitted).
    pub pending_by_workflow: BTreeMap<String, usize>,
    /// Whether the scheduler driver is running.
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(pause: u64, terminate: u64) -> TimeoutPolicy {
        TimeoutPolicy {
            pause_seconds: pause,
            terminate_seconds: terminate,
            network_volume: None,
        }
    }

    #[test]
    fn workflow_key_normalizes_case_and_whitespace() {
        assert_eq!(workflow_key("  Flux-Dev "), "flux-dev");
        assert_eq!(workflow_key("w1"), "w1");
    }

    #[test]
    fn new_request_is_pending_with_normalized_name() {
        let req = WorkflowRequest::new("SDXL", json!({"seed": 1}), 1000);
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(req.workflow_name, "sdxl");
        assert_eq!(req.enqueued_at, 1000);
        assert!(req.assigned_pod_id.is_none());
    }

    #[test]
    fn mark_interrupted_does_not_count_an_attempt() {
        let mut req = WorkflowRequest::new("w1", json!({}), 1000);
        req.mark_processing("pod-1");
        req.job_id = Some("job-1".to_string());

        req.mark_interrupted("scheduler stopped");
        assert_eq!(req.status, RequestStatus::Pending);
        assert!(req.assigned_pod_id.is_none());
        assert!(req.job_id.is_none());
        assert_eq!(req.dispatch_attempts, 0);
    }

    #[test]
    fn mark_pending_clears_assignment_and_counts_attempt() {
        let mut req = WorkflowRequest::new("w1", json!({}), 1000);
        req.mark_processing("pod-1");
        assert_eq!(req.status, RequestStatus::Processing);
        assert_eq!(req.assigned_pod_id.as_deref(), Some("pod-1"));

        req.mark_pending("engine unreachable");
        assert_eq!(req.status, RequestStatus::Pending);
        assert!(req.assigned_pod_id.is_none());
        assert_eq!(req.error.as_deref(), Some("engine unreachable"));
        assert_eq!(req.dispatch_attempts, 1);
    }

    #[test]
    fn mark_failed_records_kind() {
        let mut req = WorkflowRequest::new("w1", json!({}), 1000);
        req.mark_failed(FailureKind::Timeout, "timed out", 1300);
        assert!(req.status.is_terminal());
        assert_eq!(req.failure, Some(FailureKind::Timeout));
        assert_eq!(req.completed_at, Some(1300));
    }

    #[test]
    fn new_pod_deadlines_follow_policy() {
        let pod = Pod::new("pod-1", "W1", &policy(60, 600), 1000);
        assert_eq!(pod.status, PodStatus::Running);
        assert_eq!(pod.workflow_name, "w1");
        assert_eq!(pod.created_at, 1000);
        assert_eq!(pod.last_used_at, 1000);
        assert_eq!(pod.pause_deadline, 1060);
        assert_eq!(pod.terminate_deadline, 1600);
    }

    #[test]
    fn eligibility_respects_capacity_and_status() {
        let mut pod = Pod::new("pod-1", "w1", &policy(60, 600), 1000);
        assert!(pod.is_eligible_for("w1", 3));
        assert!(!pod.is_eligible_for("w2", 3));

        pod.in_flight = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        assert!(!pod.is_eligible_for("w1", 3));
        assert_eq!(pod.free_slots(3), 0);

        pod.in_flight.clear();
        pod.status = PodStatus::Paused;
        assert!(pod.is_eligible_for("w1", 3));

        pod.status = PodStatus::Terminated;
        assert!(!pod.is_eligible_for("w1", 3));
    }

    #[test]
    fn pause_requires_idle_and_elapsed_deadline() {
        let mut pod = Pod::new("pod-1", "w1", &policy(60, 600), 1000);
        assert!(!pod.should_pause(1060));
        assert!(pod.should_pause(1061));

        pod.in_flight.push(Uuid::new_v4());
        assert!(!pod.should_pause(5000));
    }

    #[test]
    fn terminate_only_applies_to_paused_pods() {
        let mut pod = Pod::new("pod-1", "w1", &policy(60, 600), 1000);
        assert!(!pod.should_terminate(2000));
        pod.status = PodStatus::Paused;
        assert!(!pod.should_terminate(1600));
        assert!(pod.should_terminate(1601));
    }

    #[test]
    fn policies_fall_back_to_default() {
        let mut workflows = HashMap::new();
        workflows.insert("Flux".to_string(), policy(30, 90));
        let policies = WorkflowPolicies::new(policy(300, 3600), workflows);

        assert_eq!(policies.for_workflow("flux").pause_seconds, 30);
        assert_eq!(policies.for_workflow("FLUX").terminate_seconds, 90);
        assert_eq!(policies.for_workflow("sdxl").pause_seconds, 300);
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        assert!(epoch_secs() > 1_700_000_000);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&RequestStatus::Processing).unwrap(),
            r#""processing""#
        );
        assert_eq!(serde_json::to_string(&PodStatus::Paused).unwrap(), r#""paused""#);
        assert_eq!(
            serde_json::to_string(&FailureKind::Timeout).unwrap(),
            r#""timeout""#
        );
    }
}
