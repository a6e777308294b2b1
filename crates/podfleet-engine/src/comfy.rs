//! ComfyUI HTTP adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::types::{JobHistory, JobId, JobState, OutputAsset, SubmitPayload};
use crate::{EngineClient, EngineConnector};

/// Path probed by [`EngineClient::health_check`].
pub const HEALTH_PATH: &str = "/system_stats";

/// Output keys that carry produced files.
const ASSET_KEYS: [&str; 3] = ["images", "gifs", "videos"];

/// Client for one engine instance at `host:port`.
#[derive(Debug, Clone)]
pub struct ComfyClient {
    address: String,
    base_url: String,
    client: Client,
    probe_timeout: Duration,
    /// Sent with every submission so the engine can group our jobs.
    client_id: String,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    #[serde(default)]
    status: Option<HistoryStatus>,
    #[serde(default)]
    outputs: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryStatus {
    #[serde(default)]
    status_str: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default)]
    messages: Vec<(String, Value)>,
}

impl HistoryStatus {
    fn error_message(&self) -> String {
        self.messages
            .iter()
            .find(|(kind, _)| kind == "execution_error")
            .and_then(|(_, body)| body.get("exception_message"))
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "engine reported an execution error".to_string())
    }
}

impl ComfyClient {
    pub fn new(address: impl Into<String>, client: Client, probe_timeout: Duration) -> Self {
        let address = address.into();
        Self {
            base_url: format!("http://{address}"),
            address,
            client,
            probe_timeout,
            client_id: Uuid::new_v4().to_string(),
        }
    }

    fn parse_history(job_id: &str, body: Value) -> EngineResult<Option<JobHistory>> {
        let Some(raw) = body.get(job_id) else {
            return Ok(None);
        };
        let entry: HistoryEntry = serde_json::from_value(raw.clone())
            .map_err(|e| EngineError::Parse(format!("history entry for {job_id}: {e}")))?;

        let state = match &entry.status {
            Some(status) if status.status_str.as_deref() == Some("error") => {
                JobState::Failed(status.error_message())
            }
            Some(status) if status.status_str.as_deref() == Some("success") && status.completed => {
                JobState::Completed
            }
            Some(_) => JobState::Running,
            None => JobState::Pending,
        };

        let mut outputs = Vec::new();
        for node_output in entry.outputs.values() {
            for key in ASSET_KEYS {
                if let Some(items) = node_output.get(key).and_then(Value::as_array) {
                    for item in items {
                        if let Ok(asset) = serde_json::from_value::<OutputAsset>(item.clone()) {
                            outputs.push(asset);
                        }
                    }
                }
            }
        }

        Ok(Some(JobHistory { state, outputs }))
    }
}

#[async_trait]
impl EngineClient for ComfyClient {
    async fn health_check(&self) -> bool {
        let result = self
            .client
            .get(format!("{}{HEALTH_PATH}", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(address = %self.address, status = %response.status(), "engine unhealthy");
                false
            }
            Err(e) => {
                debug!(address = %self.address, error = %e, "engine health check failed");
                false
            }
        }
    }

    async fn submit(&self, workflow_name: &str, parameters: &Value) -> EngineResult<JobId> {
        let payload = SubmitPayload::from_parameters(parameters)?;
        let body = json!({
            "prompt": payload.graph,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            if status.is_client_error() {
                return Err(EngineError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(EngineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let accepted: PromptResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;
        debug!(workflow = %workflow_name, job_id = %accepted.prompt_id, address = %self.address, "job submitted");
        Ok(accepted.prompt_id)
    }

    async fn get_history(&self, job_id: &str) -> EngineResult<Option<JobHistory>> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.base_url, job_id))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EngineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Parse(e.to_string()))?;
        Self::parse_history(job_id, body)
    }

    fn asset_url(&self, asset: &OutputAsset) -> String {
        let view = format!("{}/view", self.base_url);
        match Url::parse(&view) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("filename", &asset.filename)
                    .append_pair("subfolder", &asset.subfolder)
                    .append_pair("type", &asset.kind);
                url.to_string()
            }
            Err(_) => format!(
                "{view}?filename={}&subfolder={}&type={}",
                asset.filename, asset.subfolder, asset.kind
            ),
        }
    }
}

/// Builds a [`ComfyClient`] per pod, sharing one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct ComfyConnector {
    client: Client,
    probe_timeout: Duration,
}

impl ComfyConnector {
    pub fn new(request_timeout: Duration, probe_timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }
}

impl EngineConnector for ComfyConnector {
    fn connect(&self, address: &str) -> Arc<dyn EngineClient> {
        Arc::new(ComfyClient::new(
            address,
            self.client.clone(),
            self.probe_timeout,
        ))
    }
}
