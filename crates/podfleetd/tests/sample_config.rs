//! The sample `fleet.toml` shipped with the daemon parses and validates.

use std::path::PathBuf;
use std::time::Duration;

use podfleet_state::FleetConfig;

fn sample_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fleet.toml")
}

#[test]
fn sample_config_is_valid() {
    let config = FleetConfig::from_file(&sample_path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.scheduler.tick_interval, Duration::from_secs(10));
    assert_eq!(config.scheduler.max_in_flight, 3);
    assert_eq!(config.readiness.probe_attempts, 12);
    assert_eq!(config.engine.port, 8188);
    assert_eq!(
        config.pod_template.env.get("COMFYUI_LISTEN").map(String::as_str),
        Some("0.0.0.0")
    );
}

#[test]
fn sample_workflow_policies_override_default() {
    let config = FleetConfig::from_file(&sample_path()).unwrap();
    let policies = config.policies();

    let flux = policies.for_workflow("Flux");
    assert_eq!(flux.pause_seconds, 600);
    assert_eq!(flux.network_volume.as_deref(), Some("vol-flux-models"));

    let other = policies.for_workflow("upscale");
    assert_eq!(other.pause_seconds, 300);
    assert_eq!(other.terminate_seconds, 3600);
}

#[test]
fn effective_config_round_trips_through_toml() {
    let config = FleetConfig::from_file(&sample_path()).unwrap();
    let rendered = config.to_toml_string().unwrap();
    let reparsed: FleetConfig = toml::from_str(&rendered).unwrap();
    assert_eq!(reparsed.monitor.poll_interval, config.monitor.poll_interval);
    assert_eq!(reparsed.workflows.len(), 2);
}
