//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use trip_telemetry::infra::Config;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[service]
id = "test-service"

[api]
bind_address = "127.0.0.1"
port = 9090

[sim_provider]
base_url = "http://sim.test"
username = "user"
password = "pass"
client_id = "cid"
client_secret = "secret"
timeout_ms = 2500
max_in_flight = 2
min_interval_ms = 50

[gps_provider]
base_url = "http://gps.test"
access_token = "token-1"

[scans]
enabled = true
worker_count = 3
refresh_interval_secs = 60
delay_interval_secs = 120

[metrics]
interval_secs = 15
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.service_id(), "test-service");
    assert_eq!(config.api_bind_address(), "127.0.0.1");
    assert_eq!(config.api_port(), 9090);
    assert_eq!(config.sim_provider().base_url, "http://sim.test");
    assert_eq!(config.sim_provider().client_id.as_deref(), Some("cid"));
    assert_eq!(config.sim_timeout(), Duration::from_millis(2500));
    assert_eq!(config.gps_provider().access_token.as_deref(), Some("token-1"));
    assert_eq!(config.gps_timeout(), Duration::from_secs(10));
    assert!(config.scans_enabled());
    assert_eq!(config.worker_count(), 3);
    assert_eq!(config.refresh_interval_secs(), 60);
    assert_eq!(config.geofence_interval_secs(), 300);
    assert_eq!(config.delay_interval_secs(), 120);
    assert_eq!(config.metrics_interval_secs(), 15);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.service_id(), "trip-telemetry");
    assert_eq!(config.api_port(), 8080);
    assert!(!config.scans_enabled());
}

#[test]
fn test_missing_provider_section_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(b"[sim_provider]\nbase_url = \"http://sim.test\"\n")
        .unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_zero_workers_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    let config_content = r#"
[sim_provider]
base_url = "http://sim.test"

[gps_provider]
base_url = "http://gps.test"

[scans]
worker_count = 0
"#;
    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("worker_count"));
}

#[test]
fn test_shipped_dev_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.service_id(), "trip-telemetry-dev");
    assert!(config.scans_enabled());
}
