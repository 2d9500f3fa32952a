//! Domain models - core business types for trip telemetry
//!
//! This module contains the canonical data types used throughout the system:
//! - `Trip` / `Shipment` / `Location` - what is being tracked and where it should go
//! - `LocationSample` - immutable position reports
//! - `Alert` - raised conditions and their status history
//! - `types` - identifiers and wire enums

pub mod alert;
pub mod sample;
pub mod trip;
pub mod types;

pub use alert::{Alert, AlertStatusChange, NewAlert};
pub use sample::{Credential, LocationSample, NewSample, TrackingSummary};
pub use trip::{
    Consent, GeoPoint, Location, Shipment, ShipmentStatusChange, Trip, TripAuditEntry, Vehicle,
};
pub use types::{
    AlertId, AlertSeverity, AlertStatus, AlertType, ConsentStatus, LoadingStatus, SampleSource,
    ShipmentStatus, TokenType, TrackingType, TripId, TripStatus,
};
