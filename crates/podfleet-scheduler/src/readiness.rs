//! Connection readiness gate.
//!
//! A pod that the provider reports as running may still be booting its
//! engine. Before the first dispatch to a new or resumed pod the gate waits
//! for a reachable address and then probes the engine's health endpoint
//! until it answers.

use tracing::{debug, info};

use podfleet_engine::{EngineClient, EngineConnector};
use podfleet_state::config::ReadinessSettings;

use crate::error::{SchedulerError, SchedulerResult};
use crate::pool::PodPool;

#[derive(Debug, Clone)]
pub struct ReadinessGate {
    settings: ReadinessSettings,
}

impl ReadinessGate {
    pub fn new(settings: ReadinessSettings) -> Self {
        Self { settings }
    }

    /// Probe the engine up to `probe_attempts` times, `probe_interval` apart.
    pub async fn probe_engine(&self, engine: &dyn EngineClient, pod_id: &str) -> SchedulerResult<()> {
        let attempts = self.settings.probe_attempts;
        for attempt in 1..=attempts {
            if engine.health_check().await {
                info!(%pod_id, attempt, "engine ready");
                return Ok(());
            }
            debug!(%pod_id, attempt, max = attempts, "engine not ready");
            if attempt < attempts {
                tokio::time::sleep(self.settings.probe_interval).await;
            }
        }
        Err(SchedulerError::EngineUnreachable {
            pod_id: pod_id.to_string(),
            attempts,
        })
    }

    /// Wait for the pod's address, then for its engine. Returns the address.
    pub async fn wait_ready(
        &self,
        pool: &PodPool,
        connector: &dyn EngineConnector,
        pod_id: &str,
    ) -> SchedulerResult<String> {
        let address = pool
            .wait_for_reachable_address(
                pod_id,
                self.settings.address_attempts,
                self.settings.address_interval,
            )
            .await?;
        let engine = connector.connect(&address);
        self.probe_engine(engine.as_ref(), pod_id).await?;
        Ok(address)
    }
}
