//! Batch scans and the synchronous operator entry points
//!
//! `TrackingService` owns the wired service graph and runs the four periodic
//! scans (location refresh, geofence/shipment, delay, geofence auto-start):
//! - Each scan loads `TrackingSettings` once and passes it to every trip
//! - Trips are processed on a bounded worker pool, one task per trip
//! - A failure on one trip lands in that trip's result and never aborts the batch

mod handlers;

use crate::domain::{LocationSample, Trip, TripId, TripStatus};
use crate::infra::error::{Result, TrackingError};
use crate::infra::metrics::{Metrics, ScanKind};
use crate::infra::settings::{validate_setting, TrackingSettings};
use crate::io::store::Store;
use crate::services::alerts::AlertManager;
use crate::services::eta::DelayClass;
use crate::services::history::{LocationHistory, TrackingHistory};
use crate::services::shipments::ShipmentTracker;
use crate::services::stoppage::StoppageDetector;
use crate::services::telemetry::TelemetryAdapter;
use crate::services::trip_machine::{AutoStartOutcome, TripStateMachine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// What a scan did for one trip
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TripOutcome {
    Recorded { sequence_number: u64, stale: bool },
    /// Refreshed more recently than `tracking_frequency_seconds`
    NotDue { seconds_since_last: i64 },
    /// No samples yet, nothing to evaluate
    NoTelemetry,
    NotEligible { reason: &'static str },
    GeofenceChecked { shipment_transitions: usize, stoppage_alerts: usize },
    DelayChecked { delay: Option<DelayClass>, alert_created: bool, alerts_resolved: usize },
    AutoStart { result: AutoStartOutcome },
}

#[derive(Debug, Clone, Serialize)]
pub struct TripResult {
    pub trip_id: TripId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TripOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Aggregate summary of one scan invocation
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub scan: &'static str,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<TripResult>,
}

impl BatchResult {
    pub fn empty(scan: ScanKind) -> Self {
        Self { scan: scan.as_str(), processed: 0, succeeded: 0, failed: 0, results: Vec::new() }
    }

    /// Fold per-trip results, preserving input order
    pub fn collect<I>(scan: ScanKind, items: I) -> Self
    where
        I: IntoIterator<Item = (TripId, Result<TripOutcome>)>,
    {
        items.into_iter().fold(Self::empty(scan), |mut batch, (trip_id, result)| {
            batch.processed += 1;
            let entry = match result {
                Ok(outcome) => {
                    batch.succeeded += 1;
                    TripResult { trip_id, success: true, outcome: Some(outcome), error: None, message: None }
                }
                Err(e) => {
                    batch.failed += 1;
                    TripResult {
                        trip_id,
                        success: false,
                        outcome: None,
                        error: Some(e.code()),
                        message: Some(e.to_string()),
                    }
                }
            };
            batch.results.push(entry);
            batch
        })
    }

    pub fn result_for(&self, trip_id: &TripId) -> Option<&TripResult> {
        self.results.iter().find(|r| &r.trip_id == trip_id)
    }
}

/// A fetch-now result
#[derive(Debug, Clone, Serialize)]
pub struct RecordedLocation {
    pub sample: LocationSample,
    pub stale: bool,
    pub location_age_secs: i64,
}

#[cold]
fn log_task_aborted(scan: ScanKind, e: &tokio::task::JoinError) {
    error!(scan = %scan.as_str(), error = %e, "scan_task_aborted");
}

pub struct TrackingService {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) telemetry: Arc<TelemetryAdapter>,
    pub(crate) history: Arc<LocationHistory>,
    pub(crate) alerts: Arc<AlertManager>,
    pub(crate) shipments: Arc<ShipmentTracker>,
    pub(crate) stoppage: StoppageDetector,
    pub(crate) machine: Arc<TripStateMachine>,
    pub(crate) metrics: Arc<Metrics>,
    worker_count: usize,
}

impl TrackingService {
    pub fn new(
        store: Arc<dyn Store>,
        telemetry: Arc<TelemetryAdapter>,
        metrics: Arc<Metrics>,
        worker_count: usize,
    ) -> Arc<Self> {
        let history = Arc::new(LocationHistory::new(store.clone(), metrics.clone()));
        let alerts = Arc::new(AlertManager::new(store.clone(), metrics.clone()));
        let shipments = Arc::new(ShipmentTracker::new(store.clone(), alerts.clone()));
        let stoppage = StoppageDetector::new(store.clone(), alerts.clone());
        let machine = Arc::new(TripStateMachine::new(
            store.clone(),
            telemetry.clone(),
            history.clone(),
            shipments.clone(),
            metrics.clone(),
        ));
        Arc::new(Self {
            store,
            telemetry,
            history,
            alerts,
            shipments,
            stoppage,
            machine,
            metrics,
            worker_count: worker_count.max(1),
        })
    }

    pub fn machine(&self) -> &Arc<TripStateMachine> {
        &self.machine
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    // --- Settings ---

    pub async fn get_settings(&self) -> Result<TrackingSettings> {
        Ok(TrackingSettings::from_map(&self.store.settings().await?))
    }

    /// Validate and store one setting, returning the settings as now in effect
    pub async fn update_setting(&self, key: &str, value: &str) -> Result<TrackingSettings> {
        validate_setting(key, value)?;
        self.store.upsert_setting(key, value.trim()).await?;
        info!(key = %key, value = %value.trim(), "setting_updated");
        self.get_settings().await
    }

    // --- Interactive ---

    /// Fetch and record a location for one trip right now
    pub async fn fetch_location_now(&self, trip_id: &TripId) -> Result<RecordedLocation> {
        let trip = self
            .store
            .trip(trip_id)
            .await?
            .ok_or_else(|| TrackingError::not_found("trip", trip_id.as_str()))?;
        let now = Utc::now();
        let previous = self.store.tracking_summary(&trip.id).await?.map(|s| s.last_point);
        let fetched = self.telemetry.fetch_location(&trip).await?;
        let (stale, location_age_secs) = (fetched.stale, fetched.age_secs());
        let sample = self.record_fetched(&trip, fetched, previous, now).await?;
        self.alerts
            .resolve_active(&trip.id, crate::domain::AlertType::TrackingLost, "telemetry received", now)
            .await?;
        Ok(RecordedLocation { sample, stale, location_age_secs })
    }

    pub async fn get_tracking_history(&self, trip_id: &TripId) -> Result<TrackingHistory> {
        if self.store.trip(trip_id).await?.is_none() {
            return Err(TrackingError::not_found("trip", trip_id.as_str()));
        }
        self.history.get_tracking_history(trip_id).await
    }

    // --- Scans ---

    pub async fn refresh_all_locations(self: &Arc<Self>) -> Result<BatchResult> {
        let settings = self.get_settings().await?;
        self.refresh_all_locations_with(settings, Utc::now()).await
    }

    pub async fn refresh_all_locations_with(
        self: &Arc<Self>,
        settings: TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<BatchResult> {
        let trips = self.store.trips_by_status(TripStatus::Ongoing).await?;
        Ok(self.run_batch(ScanKind::LocationRefresh, trips, settings, now).await)
    }

    pub async fn check_geofence(self: &Arc<Self>) -> Result<BatchResult> {
        let settings = self.get_settings().await?;
        self.check_geofence_with(settings, Utc::now()).await
    }

    pub async fn check_geofence_with(
        self: &Arc<Self>,
        settings: TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<BatchResult> {
        let trips = self.store.trips_by_status(TripStatus::Ongoing).await?;
        Ok(self.run_batch(ScanKind::Geofence, trips, settings, now).await)
    }

    pub async fn check_delays(self: &Arc<Self>) -> Result<BatchResult> {
        let settings = self.get_settings().await?;
        self.check_delays_with(settings, Utc::now()).await
    }

    pub async fn check_delays_with(
        self: &Arc<Self>,
        settings: TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<BatchResult> {
        let trips = self.store.trips_by_status(TripStatus::Ongoing).await?;
        Ok(self.run_batch(ScanKind::Delay, trips, settings, now).await)
    }

    pub async fn check_geofence_auto_start(self: &Arc<Self>) -> Result<BatchResult> {
        let settings = self.get_settings().await?;
        self.check_geofence_auto_start_with(settings, Utc::now()).await
    }

    pub async fn check_geofence_auto_start_with(
        self: &Arc<Self>,
        settings: TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<BatchResult> {
        if !settings.geofence_auto_start_enabled {
            info!("geofence_auto_start_disabled");
            return Ok(BatchResult::empty(ScanKind::AutoStart));
        }
        let trips = self.store.trips_by_status(TripStatus::Created).await?;
        Ok(self.run_batch(ScanKind::AutoStart, trips, settings, now).await)
    }

    /// Process every trip on the worker pool. Results keep input order; a
    /// task that dies without reporting is recorded as a failure for its trip.
    async fn run_batch(
        self: &Arc<Self>,
        scan: ScanKind,
        trips: Vec<Trip>,
        settings: TrackingSettings,
        now: DateTime<Utc>,
    ) -> BatchResult {
        let started = Instant::now();
        let settings = Arc::new(settings);
        let permits = Arc::new(Semaphore::new(self.worker_count));
        let ids: Vec<TripId> = trips.iter().map(|t| t.id.clone()).collect();
        let mut slots: Vec<Option<Result<TripOutcome>>> = (0..trips.len()).map(|_| None).collect();

        let mut tasks = JoinSet::new();
        for (idx, trip) in trips.into_iter().enumerate() {
            let service = Arc::clone(self);
            let settings = Arc::clone(&settings);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (idx, service.process(scan, &trip, &settings, now).await)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => log_task_aborted(scan, &e),
            }
        }

        let batch = BatchResult::collect(
            scan,
            ids.into_iter().zip(slots).map(|(id, slot)| {
                let result = slot.unwrap_or_else(|| Err(TrackingError::TaskAborted(id.to_string())));
                (id, result)
            }),
        );
        self.metrics.record_scan(scan, batch.processed as u64, batch.failed as u64);
        info!(
            scan = %scan.as_str(),
            processed = %batch.processed,
            succeeded = %batch.succeeded,
            failed = %batch.failed,
            elapsed_ms = %started.elapsed().as_millis(),
            "scan_completed"
        );
        batch
    }

    async fn process(
        &self,
        scan: ScanKind,
        trip: &Trip,
        settings: &TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<TripOutcome> {
        match scan {
            ScanKind::LocationRefresh => self.refresh_trip(trip, settings, now).await,
            ScanKind::Geofence => self.geofence_trip(trip, settings, now).await,
            ScanKind::Delay => self.delay_trip(trip, settings, now).await,
            ScanKind::AutoStart => self.auto_start_trip(trip, settings, now).await,
        }
    }
}
