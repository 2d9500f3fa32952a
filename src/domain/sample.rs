//! Location samples, per-trip tracking summary and provider credentials

use crate::domain::trip::GeoPoint;
use crate::domain::types::{SampleSource, TokenType, TripId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable position report for a trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub id: String,
    pub trip_id: TripId,
    pub latitude: f64,
    pub longitude: f64,
    /// Provider-reported fix time, not receipt time
    pub event_time: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub source: SampleSource,
    /// Gap-free, strictly increasing per trip, starting at 1
    pub sequence_number: u64,
    pub address: Option<String>,
    pub speed_kmh: Option<f64>,
    pub heading_deg: Option<f64>,
    pub accuracy_meters: Option<f64>,
    /// Provider payload retained verbatim for audit
    pub raw_payload: serde_json::Value,
}

impl LocationSample {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// A sample before the store assigns identity and sequence
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub trip_id: TripId,
    pub latitude: f64,
    pub longitude: f64,
    pub event_time: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub source: SampleSource,
    pub address: Option<String>,
    pub speed_kmh: Option<f64>,
    pub heading_deg: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub raw_payload: serde_json::Value,
}

/// Cheap per-trip "latest telemetry" row maintained alongside the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSummary {
    pub trip_id: TripId,
    pub last_sequence_number: u64,
    pub last_updated_at: DateTime<Utc>,
    pub last_point: GeoPoint,
}

/// A stored provider credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub token_type: TokenType,
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
