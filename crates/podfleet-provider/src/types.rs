//! Request and response shapes exchanged with the pod provider.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Everything the provider needs to lease a new pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCreateRequest {
    pub name: String,
    pub image_name: String,
    pub gpu_type_ids: Vec<String>,
    pub gpu_count: u32,
    pub cloud_type: String,
    #[serde(rename = "containerDiskInGb")]
    pub container_disk_gb: u32,
    #[serde(rename = "volumeInGb")]
    pub volume_gb: u32,
    pub volume_mount_path: String,
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub network_volume_id: Option<String>,
}

/// Handle returned by a successful create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPod {
    pub id: String,
}

/// Pod status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderPodStatus {
    Created,
    Running,
    Restarting,
    Exited,
    Paused,
    Dead,
    Terminated,
    Failed,
    #[serde(other)]
    Unknown,
}

impl ProviderPodStatus {
    /// The pod will never become reachable again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProviderPodStatus::Failed
                | ProviderPodStatus::Terminated
                | ProviderPodStatus::Exited
                | ProviderPodStatus::Dead
        )
    }
}

impl std::fmt::Display for ProviderPodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderPodStatus::Created => "CREATED",
            ProviderPodStatus::Running => "RUNNING",
            ProviderPodStatus::Restarting => "RESTARTING",
            ProviderPodStatus::Exited => "EXITED",
            ProviderPodStatus::Paused => "PAUSED",
            ProviderPodStatus::Dead => "DEAD",
            ProviderPodStatus::Terminated => "TERMINATED",
            ProviderPodStatus::Failed => "FAILED",
            ProviderPodStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Current provider-side view of a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodDescription {
    pub id: String,
    pub status: ProviderPodStatus,
    /// `host:port` of the engine, once the provider has mapped it.
    pub network_address: Option<String>,
}

impl PodDescription {
    /// Running with an address the engine can be reached on.
    pub fn is_reachable(&self) -> bool {
        self.status == ProviderPodStatus::Running
            && self.network_address.as_deref().is_some_and(|a| !a.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_uses_provider_field_names() {
        let req = PodCreateRequest {
            name: "podfleet-w1".to_string(),
            image_name: "img".to_string(),
            gpu_type_ids: vec!["NVIDIA GeForce RTX 4090".to_string()],
            gpu_count: 1,
            cloud_type: "SECURE".to_string(),
            container_disk_gb: 50,
            volume_gb: 0,
            volume_mount_path: "/workspace".to_string(),
            ports: vec!["8188/http".to_string()],
            env: HashMap::new(),
            network_volume_id: Some("vol-1".to_string()),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["imageName"], "img");
        assert_eq!(json["containerDiskInGb"], 50);
        assert_eq!(json["volumeInGb"], 0);
        assert_eq!(json["networkVolumeId"], "vol-1");
        assert!(json.get("env").is_none());
    }

    #[test]
    fn unknown_status_is_tolerated() {
        let status: ProviderPodStatus = serde_json::from_str(r#""MIGRATING""#).unwrap();
        assert_eq!(status, ProviderPodStatus::Unknown);
        assert!(!status.is_terminal());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ProviderPodStatus::Exited.is_terminal());
        assert!(ProviderPodStatus::Failed.is_terminal());
        assert!(ProviderPodStatus::Terminated.is_terminal());
        assert!(!ProviderPodStatus::Running.is_terminal());
        assert!(!ProviderPodStatus::Created.is_terminal());
    }

    #[test]
    fn reachable_needs_running_and_address() {
        let mut desc = PodDescription {
            id: "p".to_string(),
            status: ProviderPodStatus::Running,
            network_address: None,
        };
        assert!(!desc.is_reachable());
        desc.network_address = Some("1.2.3.4:40000".to_string());
        assert!(desc.is_reachable());
        desc.status = ProviderPodStatus::Created;
        assert!(!desc.is_reachable());
    }
}
