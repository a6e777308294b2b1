//! podfleet-engine — client for the image engine running inside a pod.
//!
//! Submits jobs, reads the engine's job history, builds download URLs for
//! produced assets, and checks engine health.
//!
//! # Architecture
//!
//! ```text
//! EngineConnector::connect(address) → Arc<dyn EngineClient>
//!
//! EngineClient (trait)
//!   ├── health_check()            → GET  /system_stats  → 2xx?
//!   ├── submit(workflow, params)  → POST /prompt        → JobId
//!   ├── get_history(job_id)       → GET  /history/{id}  → Option<JobHistory>
//!   └── asset_url(asset)          → http://{address}/view?filename=..
//! ```
//!
//! A history lookup that returns `None` means the engine does not know the
//! job yet; callers treat it the same as a job that is still running.

pub mod comfy;
pub mod error;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use comfy::{ComfyClient, ComfyConnector};
pub use error::{EngineError, EngineResult};
pub use types::{JobHistory, JobId, JobState, OutputAsset, SubmitPayload};

/// Operations against one engine instance.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Whether the engine answers its health endpoint.
    async fn health_check(&self) -> bool;

    /// Submit a job. Parameters are forwarded as given.
    async fn submit(&self, workflow_name: &str, parameters: &Value) -> EngineResult<JobId>;

    async fn get_history(&self, job_id: &str) -> EngineResult<Option<JobHistory>>;

    /// Absolute download URL for a produced asset.
    fn asset_url(&self, asset: &OutputAsset) -> String;
}

/// Creates an [`EngineClient`] for a pod's network address.
pub trait EngineConnector: Send + Sync {
    fn connect(&self, address: &str) -> Arc<dyn EngineClient>;
}
