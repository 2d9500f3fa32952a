//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `credentials` - Provider token lifecycle with a per-token refresh lease
//! - `telemetry` - Uniform location fetch over the SIM and GPS providers
//! - `history` - Append-only location history and display sampling
//! - `geofence` - Haversine distance and radius evaluation
//! - `trip_machine` - Trip lifecycle with geofence validation and audit
//! - `eta` - ETA projection and delay classification
//! - `stoppage` - Stoppage clustering and alerting
//! - `alerts` - Alert creation, auto-resolution and operator status updates
//! - `shipments` - Geofence-driven shipment status transitions
//! - `scans` - Batch scans and the operator-facing service facade

pub mod alerts;
pub mod credentials;
pub mod eta;
pub mod geofence;
pub mod history;
pub mod scans;
pub mod shipments;
pub mod stoppage;
pub mod telemetry;
pub mod trip_machine;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use alerts::{AlertManager, BulkUpdateResult, StatusUpdate};
pub use credentials::CredentialManager;
pub use scans::{BatchResult, TrackingService, TripOutcome};
pub use telemetry::{ProviderLimits, TelemetryAdapter};
pub use trip_machine::{CompleteOptions, StartOptions, TransitionOptions, TripAction, TripStateMachine};
