//! Error types for the telemetry core
//!
//! One enum covers provider, configuration, business-rule and persistence
//! failures. Batch scans record these per trip; interactive operations return
//! them to the caller so the UI can offer an override path.

use crate::domain::types::{AlertStatus, TripId, TripStatus};
use smallvec::SmallVec;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Persistence failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Which side of a trip a geofence check targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofenceSide {
    Origin,
    Destination,
    Pickup,
    Drop,
}

impl GeofenceSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeofenceSide::Origin => "origin",
            GeofenceSide::Destination => "destination",
            GeofenceSide::Pickup => "pickup",
            GeofenceSide::Drop => "drop",
        }
    }
}

#[derive(Error, Debug)]
pub enum TrackingError {
    /// Credential invalid or not refreshable; fatal for the provider until reconfigured
    #[error("provider authentication failed: {0}")]
    ProviderAuth(String),

    /// Transient network/HTTP failure; the next scheduled scan retries
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("no allowed SIM consent for trip {trip_id}")]
    NoConsent { trip_id: TripId },

    #[error("no vehicle registration number for trip {trip_id}")]
    NoVehicleIdentifier { trip_id: TripId },

    #[error("trip {trip_id} has no tracking configured")]
    UnsupportedTrackingType { trip_id: TripId },

    #[error("location is {age_secs}s old")]
    StaleLocation { age_secs: i64 },

    #[error("{} location has no coordinates", .side.as_str())]
    GeofenceMissingCoordinates { side: GeofenceSide },

    #[error("POD not collected for shipments: {}", .shipment_codes.join(", "))]
    PodNotCollected { shipment_codes: SmallVec<[String; 4]> },

    #[error("cannot {action} a trip in status {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("alert cannot move from {from} to {to}")]
    InvalidAlertTransition { from: AlertStatus, to: AlertStatus },

    #[error("an override reason is required when skipping validation")]
    OverrideReasonRequired,

    #[error("vehicle is {distance_meters:.0}m from target, outside the {radius_meters:.0}m geofence")]
    ValidationFailed { distance_meters: f64, radius_meters: f64 },

    #[error("invalid value '{value}' for setting {key}")]
    InvalidSetting { key: String, value: String },

    /// A batch worker died before reporting its trip
    #[error("scan task aborted: {0}")]
    TaskAborted(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrackingError {
    /// Stable machine-readable code for API bodies and batch summaries
    pub fn code(&self) -> &'static str {
        match self {
            TrackingError::ProviderAuth(_) => "provider_auth_error",
            TrackingError::ProviderUnavailable(_) => "provider_unavailable",
            TrackingError::MalformedResponse(_) => "malformed_response",
            TrackingError::NoConsent { .. } => "no_consent",
            TrackingError::NoVehicleIdentifier { .. } => "no_vehicle_identifier",
            TrackingError::UnsupportedTrackingType { .. } => "unsupported_tracking_type",
            TrackingError::StaleLocation { .. } => "stale_location",
            TrackingError::GeofenceMissingCoordinates { .. } => "geofence_missing_coordinates",
            TrackingError::PodNotCollected { .. } => "pod_not_collected",
            TrackingError::InvalidTransition { .. } | TrackingError::InvalidAlertTransition { .. } => {
                "invalid_transition"
            }
            TrackingError::OverrideReasonRequired => "override_reason_required",
            TrackingError::ValidationFailed { .. } => "validation_failed",
            TrackingError::InvalidSetting { .. } => "invalid_setting",
            TrackingError::TaskAborted(_) => "task_aborted",
            TrackingError::Store(StoreError::NotFound { .. }) => "not_found",
            TrackingError::Store(StoreError::Backend(_)) => "store_error",
        }
    }

    /// Only transient provider failures are worth retrying on the next scan
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackingError::ProviderUnavailable(_))
    }

    /// Whether the failure came from the location provider path
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            TrackingError::ProviderAuth(_)
                | TrackingError::ProviderUnavailable(_)
                | TrackingError::MalformedResponse(_)
        )
    }

    pub(crate) fn invalid_transition(from: TripStatus, action: &'static str) -> Self {
        TrackingError::InvalidTransition { from: from.as_str().to_string(), action }
    }

    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        TrackingError::Store(StoreError::NotFound { entity, id: id.to_string() })
    }
}
