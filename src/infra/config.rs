//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! This is deploy-time configuration (provider endpoints, credentials, timeouts,
//! scan cadence). Operator-tunable thresholds live in `TrackingSettings`.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    /// Deployment identifier used as the metrics label
    #[serde(default = "default_service_id")]
    pub id: String,
}

fn default_service_id() -> String {
    "trip-telemetry".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind_address")]
    pub bind_address: String,
    /// HTTP API port (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: default_api_bind_address(), port: default_api_port() }
    }
}

fn default_api_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for SimProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sim-provider.invalid".to_string(),
            username: None,
            password: None,
            client_id: None,
            client_secret: None,
            timeout_ms: default_provider_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GpsProviderConfig {
    pub base_url: String,
    /// Static, externally provisioned bearer token
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
}

impl Default for GpsProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gps-provider.invalid".to_string(),
            access_token: None,
            timeout_ms: default_provider_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            min_interval_ms: default_min_interval_ms(),
        }
    }
}

fn default_provider_timeout_ms() -> u64 {
    10_000
}

fn default_max_in_flight() -> usize {
    4
}

fn default_min_interval_ms() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScansConfig {
    /// Drive the four scans from the binary's own timers
    #[serde(default)]
    pub enabled: bool,
    /// Trips processed concurrently within one scan
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_geofence_interval")]
    pub geofence_interval_secs: u64,
    #[serde(default = "default_delay_interval")]
    pub delay_interval_secs: u64,
    #[serde(default = "default_auto_start_interval")]
    pub auto_start_interval_secs: u64,
}

impl Default for ScansConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_count: default_worker_count(),
            refresh_interval_secs: default_refresh_interval(),
            geofence_interval_secs: default_geofence_interval(),
            delay_interval_secs: default_delay_interval(),
            auto_start_interval_secs: default_auto_start_interval(),
        }
    }
}

fn default_worker_count() -> usize {
    8
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_geofence_interval() -> u64 {
    300
}

fn default_delay_interval() -> u64 {
    900
}

fn default_auto_start_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub sim_provider: SimProviderConfig,
    pub gps_provider: GpsProviderConfig,
    #[serde(default)]
    pub scans: ScansConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    service_id: String,
    api_bind_address: String,
    api_port: u16,
    sim: SimProviderConfig,
    gps: GpsProviderConfig,
    scans: ScansConfig,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            api_bind_address: default_api_bind_address(),
            api_port: default_api_port(),
            sim: SimProviderConfig::default(),
            gps: GpsProviderConfig::default(),
            scans: ScansConfig::default(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.scans.worker_count == 0 {
            anyhow::bail!("scans.worker_count must be at least 1 in {}", path.display());
        }

        Ok(Self {
            service_id: toml_config.service.id,
            api_bind_address: toml_config.api.bind_address,
            api_port: toml_config.api.port,
            sim: toml_config.sim_provider,
            gps: toml_config.gps_provider,
            scans: toml_config.scans,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load a specific file, falling back to defaults when it is missing or invalid
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn sim_provider(&self) -> &SimProviderConfig {
        &self.sim
    }

    pub fn gps_provider(&self) -> &GpsProviderConfig {
        &self.gps
    }

    pub fn sim_timeout(&self) -> Duration {
        Duration::from_millis(self.sim.timeout_ms)
    }

    pub fn gps_timeout(&self) -> Duration {
        Duration::from_millis(self.gps.timeout_ms)
    }

    pub fn scans_enabled(&self) -> bool {
        self.scans.enabled
    }

    pub fn worker_count(&self) -> usize {
        self.scans.worker_count.max(1)
    }

    pub fn refresh_interval_secs(&self) -> u64 {
        self.scans.refresh_interval_secs
    }

    pub fn geofence_interval_secs(&self) -> u64 {
        self.scans.geofence_interval_secs
    }

    pub fn delay_interval_secs(&self) -> u64 {
        self.scans.delay_interval_secs
    }

    pub fn auto_start_interval_secs(&self) -> u64 {
        self.scans.auto_start_interval_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the scan worker pool size
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.scans.worker_count = workers;
        self
    }
}
