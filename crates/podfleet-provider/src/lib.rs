//! podfleet-provider — pod provisioning client.
//!
//! The scheduler only talks to the cloud through the [`PodProvider`]
//! trait. [`RunpodClient`] implements it against the RunPod REST API;
//! tests substitute in-memory fakes.
//!
//! # Architecture
//!
//! ```text
//! PodProvider (trait)
//!   ├── create(PodCreateRequest) → CreatedPod
//!   ├── start / stop / terminate(pod_id)
//!   └── describe(pod_id) → PodDescription { status, network_address }
//!
//! RunpodClient
//!   └── reqwest + bearer auth → {api_url}/pods[/{id}[/start|/stop]]
//! ```

pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use client::RunpodClient;
pub use error::{ProviderError, ProviderResult};
pub use types::{CreatedPod, PodCreateRequest, PodDescription, ProviderPodStatus};

/// Lease, resume, pause, release and inspect pods.
#[async_trait]
pub trait PodProvider: Send + Sync {
    async fn create(&self, request: &PodCreateRequest) -> ProviderResult<CreatedPod>;

    /// Resume a stopped pod.
    async fn start(&self, pod_id: &str) -> ProviderResult<()>;

    /// Stop a pod, keeping its disk.
    async fn stop(&self, pod_id: &str) -> ProviderResult<()>;

    /// Release a pod permanently.
    async fn terminate(&self, pod_id: &str) -> ProviderResult<()>;

    async fn describe(&self, pod_id: &str) -> ProviderResult<PodDescription>;
}
