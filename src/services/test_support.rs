//! Shared test harness: scripted provider mocks and a fully wired service graph

use crate::domain::{GeoPoint, Location, TrackingType, Trip, TripStatus, Vehicle};
use crate::infra::error::{Result, TrackingError};
use crate::infra::metrics::Metrics;
use crate::io::provider::{GpsApi, IssuedToken, SimApi};
use crate::io::store::MemoryStore;
use crate::services::credentials::CredentialManager;
use crate::services::scans::TrackingService;
use crate::services::telemetry::{ProviderLimits, TelemetryAdapter};
use crate::services::trip_machine::TripStateMachine;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) const ORIGIN: GeoPoint = GeoPoint { latitude: 12.9716, longitude: 77.5946 };
pub(crate) const DESTINATION: GeoPoint = GeoPoint { latitude: 13.0827, longitude: 80.2707 };

/// GPS-tracked trip between `ORIGIN` and `DESTINATION` on vehicle `v-{id}`
pub(crate) fn gps_trip(id: &str, status: TripStatus) -> Trip {
    let mut trip = Trip::new(
        id,
        TrackingType::Gps,
        Location::new("origin", "Origin depot", Some(ORIGIN)),
        Location::new("destination", "Destination hub", Some(DESTINATION)),
    );
    trip.status = status;
    trip.vehicle_id = Some(format!("v-{id}"));
    if matches!(status, TripStatus::Ongoing | TripStatus::OnHold) {
        trip.actual_start_time = Some(Utc::now() - Duration::minutes(10));
    }
    trip
}

pub(crate) fn registration_for(trip_id: &str) -> String {
    format!("REG-{trip_id}")
}

#[derive(Default)]
pub(crate) struct MockSim {
    payload: Mutex<Value>,
    last_msisdn: Mutex<Option<String>>,
    failing: Mutex<FxHashSet<String>>,
    logins: AtomicU32,
}

impl MockSim {
    pub(crate) fn set_fix(&self, latitude: f64, longitude: f64, at: Option<DateTime<Utc>>) {
        let mut location = json!({
            "latitude": latitude,
            "longitude": longitude,
            "detailedAddress": "Outer Ring Road, Bengaluru",
        });
        if let Some(at) = at {
            location["timestamp"] = json!(at.to_rfc3339());
        }
        *self.payload.lock() = json!({ "data": { "location": location } });
    }

    pub(crate) fn fail_msisdn(&self, msisdn: &str) {
        self.failing.lock().insert(msisdn.to_string());
    }

    pub(crate) fn last_msisdn(&self) -> Option<String> {
        self.last_msisdn.lock().clone()
    }

    pub(crate) fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SimApi for MockSim {
    async fn login(&self) -> Result<IssuedToken> {
        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken { value: format!("auth-{n}"), expires_at: Utc::now() + Duration::hours(6) })
    }

    async fn client_credentials(&self) -> Result<IssuedToken> {
        Ok(IssuedToken { value: "access".into(), expires_at: Utc::now() + Duration::minutes(30) })
    }

    async fn locate(&self, msisdn: &str, _auth_token: &str) -> Result<Value> {
        *self.last_msisdn.lock() = Some(msisdn.to_string());
        if self.failing.lock().contains(msisdn) {
            return Err(TrackingError::ProviderUnavailable(format!("sim lookup failed for {msisdn}")));
        }
        Ok(self.payload.lock().clone())
    }
}

#[derive(Default)]
pub(crate) struct MockGps {
    payload: Mutex<Value>,
    failing: Mutex<FxHashSet<String>>,
    unavailable: AtomicBool,
    calls: AtomicU32,
}

impl MockGps {
    pub(crate) fn set_payload(&self, payload: Value) {
        *self.payload.lock() = payload;
    }

    /// Fix without a provider timestamp, so it is stamped fresh on receipt
    pub(crate) fn set_point(&self, point: GeoPoint) {
        self.set_payload(json!({ "lat": point.latitude, "lng": point.longitude }));
    }

    pub(crate) fn set_point_at(&self, point: GeoPoint, at: DateTime<Utc>) {
        self.set_payload(json!({
            "lat": point.latitude,
            "lng": point.longitude,
            "time": at.to_rfc3339(),
        }));
    }

    pub(crate) fn fail_registration(&self, registration: &str) {
        self.failing.lock().insert(registration.to_string());
    }

    pub(crate) fn fail_with_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GpsApi for MockGps {
    async fn current_location(&self, registration_number: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) || self.failing.lock().contains(registration_number) {
            return Err(TrackingError::ProviderUnavailable(format!(
                "gps lookup failed for {registration_number}"
            )));
        }
        Ok(self.payload.lock().clone())
    }
}

/// Every service wired against the memory store and the mocks
pub(crate) struct Rig {
    pub store: Arc<MemoryStore>,
    pub sim: Arc<MockSim>,
    pub gps: Arc<MockGps>,
    pub metrics: Arc<Metrics>,
    pub credentials: Arc<CredentialManager>,
    pub telemetry: Arc<TelemetryAdapter>,
    pub service: Arc<TrackingService>,
    pub machine: Arc<TripStateMachine>,
}

impl Rig {
    pub(crate) fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let sim = Arc::new(MockSim::default());
        let gps = Arc::new(MockGps::default());
        let metrics = Arc::new(Metrics::new());
        let credentials =
            Arc::new(CredentialManager::new(store.clone(), sim.clone(), metrics.clone()));
        let telemetry = Arc::new(TelemetryAdapter::new(
            store.clone(),
            credentials.clone(),
            sim.clone(),
            gps.clone(),
            ProviderLimits::default(),
            ProviderLimits::default(),
            metrics.clone(),
        ));
        let service = TrackingService::new(store.clone(), telemetry.clone(), metrics.clone(), 4);
        let machine = service.machine().clone();
        Self { store, sim, gps, metrics, credentials, telemetry, service, machine }
    }

    /// Store the trip and, for GPS trips, a vehicle with registration `REG-{id}`
    pub(crate) fn put_trip(&self, trip: Trip) {
        if let Some(vehicle_id) = &trip.vehicle_id {
            self.store.put_vehicle(Vehicle {
                id: vehicle_id.clone(),
                registration_number: Some(registration_for(trip.id.as_str())),
            });
        }
        self.store.put_trip(trip);
    }
}
