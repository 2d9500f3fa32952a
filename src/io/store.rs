//! Persistence contract and in-memory backend
//!
//! The telemetry core only needs simple reads, inserts and granular updates
//! from its relational backend. `Store` captures exactly that surface.
//! `MemoryStore` keeps everything behind one mutex, which doubles as the
//! per-trip serialization point for sample sequence assignment.

use crate::domain::{
    Alert, AlertId, AlertStatus, AlertStatusChange, AlertType, Consent, ConsentStatus, Credential,
    LocationSample, NewSample, Shipment, ShipmentStatusChange, TokenType, TrackingSummary, Trip,
    TripAuditEntry, TripId, TripStatus, Vehicle,
};
use crate::domain::types::new_uuid_v7;
use crate::infra::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::HashMap;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trip fields the state machine changes on a transition
#[derive(Debug, Clone, PartialEq)]
pub struct TripTransition {
    pub status: TripStatus,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Trips
    async fn trip(&self, id: &TripId) -> StoreResult<Option<Trip>>;
    async fn trips_by_status(&self, status: TripStatus) -> StoreResult<Vec<Trip>>;
    /// Apply a status transition. Fails with `Backend` if the stored status no
    /// longer equals `expected`, so two concurrent transitions cannot both win.
    async fn transition_trip(
        &self,
        id: &TripId,
        expected: TripStatus,
        change: TripTransition,
    ) -> StoreResult<Trip>;
    async fn set_trip_eta(&self, id: &TripId, eta: DateTime<Utc>) -> StoreResult<()>;
    async fn add_trip_distance(&self, id: &TripId, km: f64) -> StoreResult<()>;
    async fn set_active_alert_count(&self, id: &TripId, count: u32) -> StoreResult<()>;
    async fn record_trip_audit(&self, entry: TripAuditEntry) -> StoreResult<()>;
    async fn trip_audit(&self, id: &TripId) -> StoreResult<Vec<TripAuditEntry>>;

    // Shipments
    async fn shipments_for_trip(&self, trip_id: &TripId) -> StoreResult<Vec<Shipment>>;
    async fn update_shipment(&self, shipment: &Shipment) -> StoreResult<()>;
    async fn record_shipment_status(&self, change: ShipmentStatusChange) -> StoreResult<()>;
    async fn shipment_history(&self, shipment_id: &str) -> StoreResult<Vec<ShipmentStatusChange>>;

    // Location history
    /// Insert a sample, assigning `sequence_number = count(existing) + 1`
    /// atomically with the insert, and upsert the trip's tracking summary.
    async fn append_sample(&self, sample: NewSample) -> StoreResult<LocationSample>;
    /// All samples for a trip ordered by sequence number
    async fn samples(&self, trip_id: &TripId) -> StoreResult<Vec<LocationSample>>;
    /// Samples whose event time is at or after `since`, ordered by event time
    async fn samples_since(
        &self,
        trip_id: &TripId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>>;
    async fn latest_sample(&self, trip_id: &TripId) -> StoreResult<Option<LocationSample>>;
    async fn tracking_summary(&self, trip_id: &TripId) -> StoreResult<Option<TrackingSummary>>;

    // Alerts
    async fn insert_alert(&self, alert: Alert) -> StoreResult<()>;
    async fn alert(&self, id: &AlertId) -> StoreResult<Option<Alert>>;
    async fn update_alert(&self, alert: &Alert) -> StoreResult<()>;
    async fn alerts_for_trip(
        &self,
        trip_id: &TripId,
        alert_type: Option<AlertType>,
    ) -> StoreResult<Vec<Alert>>;
    async fn count_active_alerts(&self, trip_id: &TripId) -> StoreResult<u32>;
    async fn record_alert_status(&self, change: AlertStatusChange) -> StoreResult<()>;
    async fn alert_history(&self, id: &AlertId) -> StoreResult<Vec<AlertStatusChange>>;

    // Credentials
    async fn credential(&self, token_type: TokenType) -> StoreResult<Option<Credential>>;
    async fn upsert_credential(&self, credential: Credential) -> StoreResult<()>;

    // Settings
    async fn settings(&self) -> StoreResult<HashMap<String, String>>;
    async fn upsert_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    // Read-only master data
    async fn consent(&self, id: &str) -> StoreResult<Option<Consent>>;
    async fn latest_allowed_consent(&self, driver_id: &str) -> StoreResult<Option<Consent>>;
    async fn vehicle(&self, id: &str) -> StoreResult<Option<Vehicle>>;
}

#[derive(Default)]
struct Inner {
    trips: FxHashMap<TripId, Trip>,
    trip_audit: Vec<TripAuditEntry>,
    shipments: Vec<Shipment>,
    shipment_history: Vec<ShipmentStatusChange>,
    samples: FxHashMap<TripId, Vec<LocationSample>>,
    summaries: FxHashMap<TripId, TrackingSummary>,
    alerts: Vec<Alert>,
    alert_history: Vec<AlertStatusChange>,
    credentials: FxHashMap<TokenType, Credential>,
    settings: HashMap<String, String>,
    consents: Vec<Consent>,
    vehicles: FxHashMap<String, Vehicle>,
}

/// In-memory `Store` used by tests and single-node deployments
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a trip (trip planning is outside this crate)
    pub fn put_trip(&self, trip: Trip) {
        self.inner.lock().trips.insert(trip.id.clone(), trip);
    }

    pub fn put_shipment(&self, shipment: Shipment) {
        let mut inner = self.inner.lock();
        inner.shipments.retain(|s| s.id != shipment.id);
        inner.shipments.push(shipment);
    }

    pub fn put_consent(&self, consent: Consent) {
        let mut inner = self.inner.lock();
        inner.consents.retain(|c| c.id != consent.id);
        inner.consents.push(consent);
    }

    pub fn put_vehicle(&self, vehicle: Vehicle) {
        self.inner.lock().vehicles.insert(vehicle.id.clone(), vehicle);
    }

    fn trip_mut<'a>(inner: &'a mut Inner, id: &TripId) -> StoreResult<&'a mut Trip> {
        inner
            .trips
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound { entity: "trip", id: id.to_string() })
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn trip(&self, id: &TripId) -> StoreResult<Option<Trip>> {
        Ok(self.inner.lock().trips.get(id).cloned())
    }

    async fn trips_by_status(&self, status: TripStatus) -> StoreResult<Vec<Trip>> {
        let inner = self.inner.lock();
        let mut trips: Vec<Trip> =
            inner.trips.values().filter(|t| t.status == status).cloned().collect();
        trips.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(trips)
    }

    async fn transition_trip(
        &self,
        id: &TripId,
        expected: TripStatus,
        change: TripTransition,
    ) -> StoreResult<Trip> {
        let mut inner = self.inner.lock();
        let trip = Self::trip_mut(&mut inner, id)?;
        if trip.status != expected {
            return Err(StoreError::Backend(format!(
                "trip {id} status changed concurrently: expected {expected}, found {}",
                trip.status
            )));
        }
        trip.status = change.status;
        if change.actual_start_time.is_some() {
            trip.actual_start_time = change.actual_start_time;
        }
        if change.actual_end_time.is_some() {
            trip.actual_end_time = change.actual_end_time;
        }
        Ok(trip.clone())
    }

    async fn set_trip_eta(&self, id: &TripId, eta: DateTime<Utc>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::trip_mut(&mut inner, id)?.current_eta = Some(eta);
        Ok(())
    }

    async fn add_trip_distance(&self, id: &TripId, km: f64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::trip_mut(&mut inner, id)?.total_distance_km += km;
        Ok(())
    }

    async fn set_active_alert_count(&self, id: &TripId, count: u32) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::trip_mut(&mut inner, id)?.active_alert_count = count;
        Ok(())
    }

    async fn record_trip_audit(&self, entry: TripAuditEntry) -> StoreResult<()> {
        self.inner.lock().trip_audit.push(entry);
        Ok(())
    }

    async fn trip_audit(&self, id: &TripId) -> StoreResult<Vec<TripAuditEntry>> {
        Ok(self.inner.lock().trip_audit.iter().filter(|e| &e.trip_id == id).cloned().collect())
    }

    async fn shipments_for_trip(&self, trip_id: &TripId) -> StoreResult<Vec<Shipment>> {
        Ok(self
            .inner
            .lock()
            .shipments
            .iter()
            .filter(|s| &s.trip_id == trip_id)
            .cloned()
            .collect())
    }

    async fn update_shipment(&self, shipment: &Shipment) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .shipments
            .iter_mut()
            .find(|s| s.id == shipment.id)
            .ok_or_else(|| StoreError::NotFound { entity: "shipment", id: shipment.id.clone() })?;
        *slot = shipment.clone();
        Ok(())
    }

    async fn record_shipment_status(&self, change: ShipmentStatusChange) -> StoreResult<()> {
        self.inner.lock().shipment_history.push(change);
        Ok(())
    }

    async fn shipment_history(&self, shipment_id: &str) -> StoreResult<Vec<ShipmentStatusChange>> {
        Ok(self
            .inner
            .lock()
            .shipment_history
            .iter()
            .filter(|c| c.shipment_id == shipment_id)
            .cloned()
            .collect())
    }

    async fn append_sample(&self, sample: NewSample) -> StoreResult<LocationSample> {
        let mut inner = self.inner.lock();
        let history = inner.samples.entry(sample.trip_id.clone()).or_default();
        let sequence_number = history.len() as u64 + 1;

        let stored = LocationSample {
            id: new_uuid_v7(),
            trip_id: sample.trip_id,
            latitude: sample.latitude,
            longitude: sample.longitude,
            event_time: sample.event_time,
            received_at: sample.received_at,
            source: sample.source,
            sequence_number,
            address: sample.address,
            speed_kmh: sample.speed_kmh,
            heading_deg: sample.heading_deg,
            accuracy_meters: sample.accuracy_meters,
            raw_payload: sample.raw_payload,
        };
        history.push(stored.clone());

        inner.summaries.insert(
            stored.trip_id.clone(),
            TrackingSummary {
                trip_id: stored.trip_id.clone(),
                last_sequence_number: sequence_number,
                last_updated_at: stored.received_at,
                last_point: stored.point(),
            },
        );

        Ok(stored)
    }

    async fn samples(&self, trip_id: &TripId) -> StoreResult<Vec<LocationSample>> {
        Ok(self.inner.lock().samples.get(trip_id).cloned().unwrap_or_default())
    }

    async fn samples_since(
        &self,
        trip_id: &TripId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>> {
        let inner = self.inner.lock();
        let mut samples: Vec<LocationSample> = inner
            .samples
            .get(trip_id)
            .map(|all| all.iter().filter(|s| s.event_time >= since).cloned().collect())
            .unwrap_or_default();
        samples.sort_by(|a, b| {
            a.event_time.cmp(&b.event_time).then(a.sequence_number.cmp(&b.sequence_number))
        });
        Ok(samples)
    }

    async fn latest_sample(&self, trip_id: &TripId) -> StoreResult<Option<LocationSample>> {
        Ok(self.inner.lock().samples.get(trip_id).and_then(|all| all.last().cloned()))
    }

    async fn tracking_summary(&self, trip_id: &TripId) -> StoreResult<Option<TrackingSummary>> {
        Ok(self.inner.lock().summaries.get(trip_id).cloned())
    }

    async fn insert_alert(&self, alert: Alert) -> StoreResult<()> {
        self.inner.lock().alerts.push(alert);
        Ok(())
    }

    async fn alert(&self, id: &AlertId) -> StoreResult<Option<Alert>> {
        Ok(self.inner.lock().alerts.iter().find(|a| &a.id == id).cloned())
    }

    async fn update_alert(&self, alert: &Alert) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let slot = inner
            .alerts
            .iter_mut()
            .find(|a| a.id == alert.id)
            .ok_or_else(|| StoreError::NotFound { entity: "alert", id: alert.id.to_string() })?;
        *slot = alert.clone();
        Ok(())
    }

    async fn alerts_for_trip(
        &self,
        trip_id: &TripId,
        alert_type: Option<AlertType>,
    ) -> StoreResult<Vec<Alert>> {
        Ok(self
            .inner
            .lock()
            .alerts
            .iter()
            .filter(|a| &a.trip_id == trip_id)
            .filter(|a| alert_type.map_or(true, |t| a.alert_type == t))
            .cloned()
            .collect())
    }

    async fn count_active_alerts(&self, trip_id: &TripId) -> StoreResult<u32> {
        Ok(self
            .inner
            .lock()
            .alerts
            .iter()
            .filter(|a| &a.trip_id == trip_id && a.status == AlertStatus::Active)
            .count() as u32)
    }

    async fn record_alert_status(&self, change: AlertStatusChange) -> StoreResult<()> {
        self.inner.lock().alert_history.push(change);
        Ok(())
    }

    async fn alert_history(&self, id: &AlertId) -> StoreResult<Vec<AlertStatusChange>> {
        Ok(self.inner.lock().alert_history.iter().filter(|c| &c.alert_id == id).cloned().collect())
    }

    async fn credential(&self, token_type: TokenType) -> StoreResult<Option<Credential>> {
        Ok(self.inner.lock().credentials.get(&token_type).cloned())
    }

    async fn upsert_credential(&self, credential: Credential) -> StoreResult<()> {
        self.inner.lock().credentials.insert(credential.token_type, credential);
        Ok(())
    }

    async fn settings(&self) -> StoreResult<HashMap<String, String>> {
        Ok(self.inner.lock().settings.clone())
    }

    async fn upsert_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.lock().settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn consent(&self, id: &str) -> StoreResult<Option<Consent>> {
        Ok(self.inner.lock().consents.iter().find(|c| c.id == id).cloned())
    }

    async fn latest_allowed_consent(&self, driver_id: &str) -> StoreResult<Option<Consent>> {
        Ok(self
            .inner
            .lock()
            .consents
            .iter()
            .filter(|c| c.driver_id == driver_id && c.status == ConsentStatus::Allowed)
            .max_by_key(|c| c.updated_at)
            .cloned())
    }

    async fn vehicle(&self, id: &str) -> StoreResult<Option<Vehicle>> {
        Ok(self.inner.lock().vehicles.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, SampleSource, TrackingType};

    fn new_sample(trip_id: &TripId, minutes: i64) -> NewSample {
        let at = Utc::now() + chrono::Duration::minutes(minutes);
        NewSample {
            trip_id: trip_id.clone(),
            latitude: 12.97,
            longitude: 77.59,
            event_time: at,
            received_at: at,
            source: SampleSource::Gps,
            address: None,
            speed_kmh: None,
            heading_deg: None,
            accuracy_meters: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_append_sample_assigns_sequence_and_summary() {
        let store = MemoryStore::new();
        let trip_id = TripId::new("t1");

        let first = store.append_sample(new_sample(&trip_id, 0)).await.unwrap();
        let second = store.append_sample(new_sample(&trip_id, 1)).await.unwrap();
        let other = store.append_sample(new_sample(&TripId::new("t2"), 0)).await.unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(other.sequence_number, 1);

        let summary = store.tracking_summary(&trip_id).await.unwrap().unwrap();
        assert_eq!(summary.last_sequence_number, 2);
        assert_eq!(summary.last_updated_at, second.received_at);
    }

    #[tokio::test]
    async fn test_samples_since_filters_by_event_time() {
        let store = MemoryStore::new();
        let trip_id = TripId::new("t1");
        store.append_sample(new_sample(&trip_id, -120)).await.unwrap();
        store.append_sample(new_sample(&trip_id, -10)).await.unwrap();

        let recent = store
            .samples_since(&trip_id, Utc::now() - chrono::Duration::minutes(60))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].sequence_number, 2);
    }

    #[tokio::test]
    async fn test_transition_trip_guards_expected_status() {
        let store = MemoryStore::new();
        let trip = Trip::new("t1", TrackingType::Gps, Location::default(), Location::default());
        store.put_trip(trip);

        let change = TripTransition {
            status: TripStatus::Ongoing,
            actual_start_time: Some(Utc::now()),
            actual_end_time: None,
        };
        let id = TripId::new("t1");
        let updated = store.transition_trip(&id, TripStatus::Created, change.clone()).await.unwrap();
        assert_eq!(updated.status, TripStatus::Ongoing);

        let err = store.transition_trip(&id, TripStatus::Created, change).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_latest_allowed_consent_picks_newest() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for (id, status, offset) in [
            ("c1", ConsentStatus::Allowed, 0),
            ("c2", ConsentStatus::Allowed, 5),
            ("c3", ConsentStatus::Revoked, 10),
        ] {
            store.put_consent(Consent {
                id: id.to_string(),
                driver_id: "d1".to_string(),
                trip_id: None,
                msisdn: format!("9100000{offset:03}"),
                status,
                updated_at: base + chrono::Duration::minutes(offset),
            });
        }

        let consent = store.latest_allowed_consent("d1").await.unwrap().unwrap();
        assert_eq!(consent.id, "c2");
        assert!(store.latest_allowed_consent("d2").await.unwrap().is_none());
    }
}
