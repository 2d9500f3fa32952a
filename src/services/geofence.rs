//! Geofence evaluation - great-circle distance and mode-aware radius membership
//!
//! Pure functions, no I/O.

use crate::domain::{GeoPoint, Location, TrackingType};
use crate::infra::error::{GeofenceSide, Result, TrackingError};
use serde::Serialize;

/// Mean Earth radius used by the Haversine formula (meters)
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Outcome of testing a point against a circular target region
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeofenceEvaluation {
    pub distance_meters: f64,
    pub radius_meters: f64,
    pub within_geofence: bool,
}

/// Great-circle distance between two points in meters
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

#[inline]
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_meters(a, b) / 1000.0
}

/// Evaluate `current` against `target`, selecting the radius by tracking mode.
///
/// Fails with `GeofenceMissingCoordinates` when the target has no coordinates.
pub fn evaluate(
    current: GeoPoint,
    target: &Location,
    tracking_type: TrackingType,
    side: GeofenceSide,
) -> Result<GeofenceEvaluation> {
    let center = target.coordinates.ok_or(TrackingError::GeofenceMissingCoordinates { side })?;
    let distance_meters = haversine_meters(current, center);
    let radius_meters = target.radius_for(tracking_type);
    Ok(GeofenceEvaluation {
        distance_meters,
        radius_meters,
        within_geofence: distance_meters <= radius_meters,
    })
}

/// Distance to a target without a radius check
pub fn distance_to(
    current: GeoPoint,
    target: &Location,
    side: GeofenceSide,
) -> Result<f64> {
    let center = target.coordinates.ok_or(TrackingError::GeofenceMissingCoordinates { side })?;
    Ok(haversine_meters(current, center))
}
