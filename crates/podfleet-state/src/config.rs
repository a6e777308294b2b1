//! fleet.toml configuration parser.
//!
//! Every key is optional; missing keys fall back to the defaults below.
//! Durations are written as strings (`"5s"`, `"500ms"`, `"2m"`). The
//! `RUNPOD_API_KEY` environment variable takes precedence over
//! `provider.api_key` in the file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{TimeoutPolicy, WorkflowPolicies};

/// Environment variable overriding `provider.api_key`.
pub const API_KEY_ENV: &str = "RUNPOD_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub scheduler: SchedulerSettings,
    pub readiness: ReadinessSettings,
    pub monitor: MonitorSettings,
    pub provider: ProviderSettings,
    pub engine: EngineSettings,
    pub pod_template: PodTemplate,
    pub default_policy: TimeoutPolicy,
    pub workflows: HashMap<String, TimeoutPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,
    /// Requests a single pod may hold at once.
    pub max_in_flight: usize,
    /// Provider create calls per `create_pod` before giving up for the tick.
    pub create_attempts: u32,
    #[serde(with = "duration_str")]
    pub create_retry_delay: Duration,
    /// Readiness failures a request survives before it is failed.
    pub max_dispatch_attempts: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            max_in_flight: 3,
            create_attempts: 3,
            create_retry_delay: Duration::from_secs(2),
            max_dispatch_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Describe polls while waiting for the pod to report an address.
    pub address_attempts: u32,
    #[serde(with = "duration_str")]
    pub address_interval: Duration,
    /// Engine health probes before the pod is declared unreachable.
    pub probe_attempts: u32,
    #[serde(with = "duration_str")]
    pub probe_interval: Duration,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            address_attempts: 60,
            address_interval: Duration::from_secs(5),
            probe_attempts: 12,
            probe_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    #[serde(with = "duration_str")]
    pub initial_delay: Duration,
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            max_attempts: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_url: "https://rest.runpod.io/v1".to_string(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Port the engine listens on inside the pod.
    pub port: u16,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
    #[serde(with = "duration_str")]
    pub probe_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            port: 8188,
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Fixed image and resource template for every pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PodTemplate {
    pub name_prefix: String,
    pub image_name: String,
    pub gpu_type_ids: Vec<String>,
    pub gpu_count: u32,
    pub cloud_type: String,
    pub container_disk_gb: u32,
    pub volume_gb: u32,
    pub volume_mount_path: String,
    pub ports: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for PodTemplate {
    fn default() -> Self {
        Self {
            name_prefix: "podfleet".to_string(),
            image_name: "runpod/comfyui:latest".to_string(),
            gpu_type_ids: vec!["NVIDIA GeForce RTX 4090".to_string()],
            gpu_count: 1,
            cloud_type: "SECURE".to_string(),
            container_disk_gb: 50,
            volume_gb: 0,
            volume_mount_path: "/workspace".to_string(),
            ports: vec!["8188/http".to_string()],
            env: HashMap::new(),
        }
    }
}

impl FleetConfig {
    /// Parse a config file without applying environment overrides.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` (or defaults when `None`), apply environment overrides,
    /// and validate.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                config.provider.api_key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "scheduler.tick_interval must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_in_flight must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.create_attempts == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.create_attempts must be greater than 0".to_string(),
            ));
        }
        if self.readiness.address_attempts == 0 || self.readiness.probe_attempts == 0 {
            return Err(ConfigError::Invalid(
                "readiness attempts must be greater than 0".to_string(),
            ));
        }
        if self.monitor.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "monitor.max_attempts must be greater than 0".to_string(),
            ));
        }
        if !self.provider.api_url.starts_with("http://")
            && !self.provider.api_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(
                "provider.api_url must start with http:// or https://".to_string(),
            ));
        }

        validate_policy("default_policy", &self.default_policy)?;
        for (name, policy) in &self.workflows {
            validate_policy(&format!("workflows.{name}"), policy)?;
        }
        Ok(())
    }

    /// Build the per-workflow policy lookup.
    pub fn policies(&self) -> WorkflowPolicies {
        WorkflowPolicies::new(self.default_policy.clone(), self.workflows.clone())
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn validate_policy(label: &str, policy: &TimeoutPolicy) -> ConfigResult<()> {
    if policy.pause_seconds == 0 {
        return Err(ConfigError::Invalid(format!(
            "{label}.pause_seconds must be greater than 0"
        )));
    }
    if policy.terminate_seconds <= policy.pause_seconds {
        return Err(ConfigError::Invalid(format!(
            "{label}.terminate_seconds must exceed pause_seconds"
        )));
    }
    Ok(())
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    };
    parsed.ok_or_else(|| ConfigError::Duration(s.to_string()))
}

/// Render a duration in the shortest form `parse_duration` reads back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 || (d.as_secs() == 0 && !d.is_zero()) {
        format!("{}ms", d.as_millis())
    } else if d.as_secs() != 0 && d.as_secs() % 60 == 0 {
        format!("{}m", d.as_secs() / 60)
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_fixed_policy() {
        let config = FleetConfig::default();
        assert_eq!(config.scheduler.max_in_flight, 3);
        assert_eq!(config.readiness.probe_attempts, 12);
        assert_eq!(config.readiness.probe_interval, Duration::from_secs(10));
        assert_eq!(config.monitor.max_attempts, 60);
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(5));
        assert_eq!(config.monitor.initial_delay, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[scheduler]
tick_interval = "2s"

[default_policy]
pause_seconds = 120
terminate_seconds = 900

[workflows.Flux]
pause_seconds = 30
terminate_seconds = 300
network_volume = "vol-123"
"#;
        let config: FleetConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(2));
        assert_eq!(config.scheduler.max_in_flight, 3);
        assert_eq!(config.engine.port, 8188);

        let policies = config.policies();
        assert_eq!(policies.for_workflow("flux").pause_seconds, 30);
        assert_eq!(
            policies.for_workflow("flux").network_volume.as_deref(),
            Some("vol-123")
        );
        assert_eq!(policies.for_workflow("other").pause_seconds, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_terminate_not_after_pause() {
        let mut config = FleetConfig::default();
        config.default_policy.terminate_seconds = config.default_policy.pause_seconds;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_capacity_and_bad_url() {
        let mut config = FleetConfig::default();
        config.scheduler.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.provider.api_url = "rest.runpod.io".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_duration_is_a_parse_error() {
        let toml_str = r#"
[monitor]
poll_interval = "soon"
"#;
        assert!(toml::from_str::<FleetConfig>(toml_str).is_err());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn oversized_minutes_are_rejected() {
        let huge = format!("{}m", u64::MAX / 2);
        assert!(matches!(parse_duration(&huge), Err(ConfigError::Duration(_))));
    }

    #[test]
    fn format_duration_reads_back() {
        for d in [
            Duration::from_millis(250),
            Duration::from_secs(5),
            Duration::from_secs(120),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nport = 9000").unwrap();

        let config = FleetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.engine.port, 9000);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = FleetConfig::load(None).unwrap();
        assert_eq!(config.scheduler.create_attempts, 3);
    }
}
