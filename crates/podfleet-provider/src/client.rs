//! RunPod REST adapter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::types::{CreatedPod, PodCreateRequest, PodDescription, ProviderPodStatus};
use crate::PodProvider;

/// [`PodProvider`] backed by the RunPod REST API.
#[derive(Debug, Clone)]
pub struct RunpodClient {
    base_url: String,
    api_key: String,
    /// Container port the engine listens on; used to pick the public mapping.
    engine_port: u16,
    client: Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodResponse {
    id: String,
    #[serde(default)]
    desired_status: Option<ProviderPodStatus>,
    #[serde(default)]
    public_ip: Option<String>,
    #[serde(default)]
    port_mappings: Option<HashMap<String, u16>>,
}

impl PodResponse {
    fn network_address(&self, engine_port: u16) -> Option<String> {
        let ip = self.public_ip.as_deref().filter(|ip| !ip.is_empty())?;
        let port = self.port_mappings.as_ref()?.get(&engine_port.to_string())?;
        Some(format!("{ip}:{port}"))
    }
}

impl RunpodClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        engine_port: u16,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, api_key, engine_port, client))
    }

    pub fn with_client(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        engine_port: u16,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            engine_port,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn pod_url(&self, pod_id: &str) -> String {
        format!("{}/pods/{}", self.base_url, pod_id)
    }

    // ── Response handling ──────────────────────────────────────────

    async fn handle_response<T: DeserializeOwned>(
        &self,
        pod_id: Option<&str>,
        response: reqwest::Response,
    ) -> ProviderResult<T> {
        let response = Self::check_status(pod_id, response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn check_status(
        pod_id: Option<&str>,
        response: reqwest::Response,
    ) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(id) = pod_id {
                return Err(ProviderError::NotFound(id.to_string()));
            }
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(ProviderError::api(status.as_u16(), message))
    }
}

#[async_trait]
impl PodProvider for RunpodClient {
    async fn create(&self, request: &PodCreateRequest) -> ProviderResult<CreatedPod> {
        let url = format!("{}/pods", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let pod: PodResponse = self.handle_response(None, response).await?;
        debug!(pod_id = %pod.id, name = %request.name, "provider created pod");
        Ok(CreatedPod { id: pod.id })
    }

    async fn start(&self, pod_id: &str) -> ProviderResult<()> {
        let url = format!("{}/start", self.pod_url(pod_id));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check_status(Some(pod_id), response).await?;
        debug!(%pod_id, "provider started pod");
        Ok(())
    }

    async fn stop(&self, pod_id: &str) -> ProviderResult<()> {
        let url = format!("{}/stop", self.pod_url(pod_id));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check_status(Some(pod_id), response).await?;
        debug!(%pod_id, "provider stopped pod");
        Ok(())
    }

    async fn terminate(&self, pod_id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(self.pod_url(pod_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check_status(Some(pod_id), response).await?;
        debug!(%pod_id, "provider terminated pod");
        Ok(())
    }

    async fn describe(&self, pod_id: &str) -> ProviderResult<PodDescription> {
        let response = self
            .client
            .get(self.pod_url(pod_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let pod: PodResponse = self.handle_response(Some(pod_id), response).await?;
        Ok(PodDescription {
            network_address: pod.network_address(self.engine_port),
            status: pod.desired_status.unwrap_or(ProviderPodStatus::Unknown),
            id: pod.id,
        })
    }
}
