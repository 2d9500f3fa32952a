//! Trip, shipment and target-location data model

use crate::domain::types::{
    ConsentStatus, LoadingStatus, ShipmentStatus, TrackingType, TripId, TripStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default acceptance radius when GPS tracks the trip
pub const DEFAULT_GPS_RADIUS_METERS: f64 = 200.0;

/// Default acceptance radius when SIM cell positioning tracks the trip
pub const DEFAULT_SIM_RADIUS_METERS: f64 = 500.0;

/// A WGS84 coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A geofence target: optional center plus per-provider radii
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    /// Absent coordinates disable geofence checks against this target
    pub coordinates: Option<GeoPoint>,
    pub gps_radius_meters: Option<f64>,
    pub sim_radius_meters: Option<f64>,
}

impl Location {
    pub fn new(id: &str, name: &str, coordinates: Option<GeoPoint>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            coordinates,
            gps_radius_meters: None,
            sim_radius_meters: None,
        }
    }

    /// Radius that applies for the given provider accuracy class
    pub fn radius_for(&self, tracking_type: TrackingType) -> f64 {
        match tracking_type {
            TrackingType::Sim => self.sim_radius_meters.unwrap_or(DEFAULT_SIM_RADIUS_METERS),
            TrackingType::Gps | TrackingType::None => {
                self.gps_radius_meters.unwrap_or(DEFAULT_GPS_RADIUS_METERS)
            }
        }
    }
}

/// A planned or running trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub code: String,
    pub status: TripStatus,
    pub tracking_type: TrackingType,
    pub vehicle_id: Option<String>,
    pub driver_id: Option<String>,
    /// Consent record bound to this trip at planning time
    pub consent_id: Option<String>,
    pub origin: Location,
    pub destination: Location,
    pub planned_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub planned_eta: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub actual_end_time: Option<DateTime<Utc>>,
    pub current_eta: Option<DateTime<Utc>>,
    pub total_distance_km: f64,
    pub active_alert_count: u32,
}

impl Trip {
    /// Create a trip in `created` status. Used by planning fixtures and tests;
    /// trip planning itself lives outside this crate.
    pub fn new(id: &str, tracking_type: TrackingType, origin: Location, destination: Location) -> Self {
        Self {
            id: TripId::new(id),
            code: id.to_uppercase(),
            status: TripStatus::Created,
            tracking_type,
            vehicle_id: None,
            driver_id: None,
            consent_id: None,
            origin,
            destination,
            planned_start_time: None,
            planned_end_time: None,
            planned_eta: None,
            actual_start_time: None,
            actual_end_time: None,
            current_eta: None,
            total_distance_km: 0.0,
            active_alert_count: 0,
        }
    }

    pub fn has_tracking(&self) -> bool {
        self.tracking_type != TrackingType::None
    }

    /// Baseline the delay detector measures against
    pub fn schedule_baseline(&self) -> Option<DateTime<Utc>> {
        self.planned_eta.or(self.planned_end_time)
    }
}

/// A shipment carried on a trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,
    pub code: String,
    pub trip_id: TripId,
    pub status: ShipmentStatus,
    pub loading_status: LoadingStatus,
    pub pod_collected: bool,
    pub pickup: Location,
    pub drop: Location,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Shipment {
    pub fn new(id: &str, trip_id: &TripId, pickup: Location, drop: Location) -> Self {
        Self {
            id: id.to_string(),
            code: id.to_uppercase(),
            trip_id: trip_id.clone(),
            status: ShipmentStatus::Mapped,
            loading_status: LoadingStatus::Pending,
            pod_collected: false,
            pickup,
            drop,
            updated_at: None,
        }
    }
}

/// Driver consent for SIM-based location lookups (read-only here)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub id: String,
    pub driver_id: String,
    pub trip_id: Option<TripId>,
    pub msisdn: String,
    pub status: ConsentStatus,
    pub updated_at: DateTime<Utc>,
}

/// Vehicle master record, reduced to what the GPS lookup needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub registration_number: Option<String>,
}

/// Immutable audit row written for every trip transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripAuditEntry {
    pub id: String,
    pub trip_id: TripId,
    pub action: String,
    pub previous_status: TripStatus,
    pub new_status: TripStatus,
    pub validation_overridden: bool,
    pub override_reason: Option<String>,
    pub distance_meters: Option<f64>,
    pub radius_meters: Option<f64>,
    pub actor: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Immutable history row for a shipment status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentStatusChange {
    pub id: String,
    pub shipment_id: String,
    pub trip_id: TripId,
    pub previous_status: ShipmentStatus,
    pub new_status: ShipmentStatus,
    pub distance_meters: Option<f64>,
    /// What triggered the change, e.g. `geofence_scan` or `trip_completion`
    pub source: String,
    pub created_at: DateTime<Utc>,
}
