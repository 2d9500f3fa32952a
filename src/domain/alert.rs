//! Alert data model

use crate::domain::trip::GeoPoint;
use crate::domain::types::{AlertId, AlertSeverity, AlertStatus, AlertType, TripId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A condition raised against a trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub trip_id: TripId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub description: String,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    /// Type-specific details (dedup keys, measured durations, shipment codes)
    pub metadata: serde_json::Value,
}

/// Everything needed to raise a new alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub trip_id: TripId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub location: Option<GeoPoint>,
    pub threshold_value: Option<f64>,
    pub actual_value: Option<f64>,
    pub metadata: serde_json::Value,
}

impl NewAlert {
    pub fn new(trip_id: &TripId, alert_type: AlertType, severity: AlertSeverity, title: &str) -> Self {
        Self {
            trip_id: trip_id.clone(),
            alert_type,
            severity,
            title: title.to_string(),
            description: String::new(),
            location: None,
            threshold_value: None,
            actual_value: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_location(mut self, location: Option<GeoPoint>) -> Self {
        self.location = location;
        self
    }

    pub fn with_values(mut self, threshold: f64, actual: f64) -> Self {
        self.threshold_value = Some(threshold);
        self.actual_value = Some(actual);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Materialize into an active alert triggered at `now`
    pub fn into_alert(self, now: DateTime<Utc>) -> Alert {
        Alert {
            id: AlertId::generate(),
            trip_id: self.trip_id,
            alert_type: self.alert_type,
            severity: self.severity,
            status: AlertStatus::Active,
            title: self.title,
            description: self.description,
            triggered_at: now,
            resolved_at: None,
            location: self.location,
            threshold_value: self.threshold_value,
            actual_value: self.actual_value,
            metadata: self.metadata,
        }
    }
}

/// Immutable history row for an alert status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertStatusChange {
    pub id: String,
    pub alert_id: AlertId,
    pub trip_id: TripId,
    pub previous_status: Option<AlertStatus>,
    pub new_status: AlertStatus,
    pub user_id: Option<String>,
    pub notes: Option<String>,
    /// `system` for detector-driven changes, `operator` otherwise
    pub source: String,
    pub created_at: DateTime<Utc>,
}
