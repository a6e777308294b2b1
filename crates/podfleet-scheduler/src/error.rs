//! Scheduler error types.

use podfleet_provider::{ProviderError, ProviderPodStatus};
use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("pod provisioning failed for workflow {workflow}: {source}")]
    Provisioning {
        workflow: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider call failed for pod {pod_id}: {source}")]
    Provider {
        pod_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("pod {pod_id} reported no reachable address after {attempts} attempts")]
    AddressTimeout { pod_id: String, attempts: u32 },

    #[error("pod {pod_id} entered terminal status {status}")]
    PodFailed {
        pod_id: String,
        status: ProviderPodStatus,
    },

    #[error("engine on pod {pod_id} unreachable after {attempts} probes")]
    EngineUnreachable { pod_id: String, attempts: u32 },

    #[error("pod not found: {0}")]
    PodNotFound(String),

    #[error("a pod for workflow {0} is already running or being created")]
    AlreadyRunning(String),
}

impl SchedulerError {
    /// The pod is gone for good and should leave the pool.
    pub fn is_pod_lost(&self) -> bool {
        matches!(self, Self::PodFailed { .. } | Self::PodNotFound(_))
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
