//! Trip telemetry service
//!
//! Tracks vehicles on running trips through SIM and GPS location providers,
//! turns positions into trip lifecycle events and alerts, and serves the
//! operator API.
//!
//! Module structure:
//! - `domain/` - Core business types (Trip, Shipment, LocationSample, Alert)
//! - `io/` - External interfaces (store, provider clients, HTTP API)
//! - `services/` - Business logic (telemetry, trip state machine, alerts, scans)
//! - `infra/` - Infrastructure (Config, Settings, Metrics, Errors)

use anyhow::Context;
use clap::Parser;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use trip_telemetry::infra::{Config, Metrics, ScanKind};
use trip_telemetry::io::api::{start_api_server, ApiState};
use trip_telemetry::io::{GpsClient, MemoryStore, SimClient};
use trip_telemetry::services::{
    BatchResult, CredentialManager, ProviderLimits, TelemetryAdapter, TrackingService,
};

/// Trip telemetry and geofence/alert engine
#[derive(Parser, Debug)]
#[command(name = "trip-telemetry", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

/// Run one scan kind on a fixed interval until shutdown. 0 disables the loop.
fn spawn_scan_loop<F, Fut>(kind: ScanKind, every_secs: u64, mut shutdown: watch::Receiver<bool>, run: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = trip_telemetry::infra::Result<BatchResult>> + Send,
{
    if every_secs == 0 {
        info!(scan = %kind.as_str(), "scan_loop_disabled");
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(every_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = run().await {
                        error!(scan = %kind.as_str(), error_code = %e.code(), error = %e, "scan_failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default INFO, RUST_LOG=debug for per-trip scan progress
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("trip-telemetry starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        service_id = %config.service_id(),
        api_port = %config.api_port(),
        sim_base_url = %config.sim_provider().base_url,
        gps_base_url = %config.gps_provider().base_url,
        scans_enabled = %config.scans_enabled(),
        worker_count = %config.worker_count(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Shared components
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(MemoryStore::new());
    let sim = Arc::new(SimClient::new(config.sim_provider()).context("failed to build SIM client")?);
    let gps = Arc::new(GpsClient::new(config.gps_provider()).context("failed to build GPS client")?);
    let credentials = Arc::new(CredentialManager::new(store.clone(), sim.clone(), metrics.clone()));
    let telemetry = Arc::new(TelemetryAdapter::new(
        store.clone(),
        credentials,
        sim,
        gps,
        ProviderLimits::sim_from_config(&config),
        ProviderLimits::gps_from_config(&config),
        metrics.clone(),
    ));
    let service = TrackingService::new(store, telemetry, metrics.clone(), config.worker_count());

    // HTTP API (if port > 0)
    let api_task = if config.api_port() > 0 {
        let state = Arc::new(ApiState::new(service.clone(), config.service_id()));
        let bind = config.api_bind_address().to_string();
        let port = config.api_port();
        let api_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_api_server(&bind, port, state, api_shutdown).await {
                error!(error = %format!("{e:#}"), "api_server_error");
            }
        }))
    } else {
        info!("api_disabled");
        None
    };

    // Periodic scans stand in for the external scheduler
    if config.scans_enabled() {
        let svc = service.clone();
        spawn_scan_loop(ScanKind::LocationRefresh, config.refresh_interval_secs(), shutdown_rx.clone(), move || {
            let svc = svc.clone();
            async move { svc.refresh_all_locations().await }
        });
        let svc = service.clone();
        spawn_scan_loop(ScanKind::Geofence, config.geofence_interval_secs(), shutdown_rx.clone(), move || {
            let svc = svc.clone();
            async move { svc.check_geofence().await }
        });
        let svc = service.clone();
        spawn_scan_loop(ScanKind::Delay, config.delay_interval_secs(), shutdown_rx.clone(), move || {
            let svc = svc.clone();
            async move { svc.check_delays().await }
        });
        let svc = service.clone();
        spawn_scan_loop(ScanKind::AutoStart, config.auto_start_interval_secs(), shutdown_rx.clone(), move || {
            let svc = svc.clone();
            async move { svc.check_geofence_auto_start().await }
        });
        info!("scan_loops_started");
    }

    // Metrics reporter (lock-free reads with full summary)
    let metrics_interval = config.metrics_interval_secs().max(1);
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics.report().log(),
                _ = metrics_shutdown.changed() => {
                    if *metrics_shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    if let Some(task) = api_task {
        let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
    }

    info!("trip-telemetry shutdown complete");
    Ok(())
}
