//! Operator-tunable tracking settings
//!
//! Stored as a flat key→string map. Each scan loads the map once and parses it
//! into a typed `TrackingSettings` value, so scans never reach back into the
//! store for configuration mid-run.

use crate::infra::error::{Result, TrackingError};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

pub const TRACKING_FREQUENCY_SECONDS: &str = "tracking_frequency_seconds";
pub const DELAY_THRESHOLD_PERCENT: &str = "delay_threshold_percent";
pub const ORIGIN_GEOFENCE_RADIUS_KM: &str = "origin_geofence_radius_km";
pub const DESTINATION_GEOFENCE_RADIUS_KM: &str = "destination_geofence_radius_km";
pub const GEOFENCE_AUTO_START_ENABLED: &str = "geofence_auto_start_enabled";
pub const TRACKING_LOST_THRESHOLD_MINUTES: &str = "tracking_lost_threshold_minutes";
pub const STOPPAGE_LOOKBACK_HOURS: &str = "stoppage_lookback_hours";

pub const MAX_TRACKING_FREQUENCY_SECONDS: i64 = 86_400;
pub const MAX_TRACKING_LOST_THRESHOLD_MINUTES: i64 = 10_080;
pub const MAX_STOPPAGE_LOOKBACK_HOURS: i64 = 720;

/// Value type of a known setting key
#[derive(Debug, Clone, Copy, PartialEq)]
enum SettingKind {
    /// Inclusive upper bound keeps derived durations representable
    Integer { max: i64 },
    Float,
    Bool,
}

const KNOWN_SETTINGS: [(&str, SettingKind); 7] = [
    (TRACKING_FREQUENCY_SECONDS, SettingKind::Integer { max: MAX_TRACKING_FREQUENCY_SECONDS }),
    (DELAY_THRESHOLD_PERCENT, SettingKind::Float),
    (ORIGIN_GEOFENCE_RADIUS_KM, SettingKind::Float),
    (DESTINATION_GEOFENCE_RADIUS_KM, SettingKind::Float),
    (GEOFENCE_AUTO_START_ENABLED, SettingKind::Bool),
    (TRACKING_LOST_THRESHOLD_MINUTES, SettingKind::Integer { max: MAX_TRACKING_LOST_THRESHOLD_MINUTES }),
    (STOPPAGE_LOOKBACK_HOURS, SettingKind::Integer { max: MAX_STOPPAGE_LOOKBACK_HOURS }),
];

/// Typed snapshot of the settings map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingSettings {
    pub tracking_frequency_seconds: u64,
    pub delay_threshold_percent: f64,
    pub origin_geofence_radius_km: f64,
    pub destination_geofence_radius_km: f64,
    pub geofence_auto_start_enabled: bool,
    pub tracking_lost_threshold_minutes: i64,
    pub stoppage_lookback_hours: i64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tracking_frequency_seconds: 300,
            delay_threshold_percent: 15.0,
            origin_geofence_radius_km: 0.5,
            destination_geofence_radius_km: 0.5,
            geofence_auto_start_enabled: false,
            tracking_lost_threshold_minutes: 60,
            stoppage_lookback_hours: 12,
        }
    }
}

impl TrackingSettings {
    /// Parse a stored map. Unparseable values fall back to defaults with a warning
    /// so one bad row never stops every scan.
    pub fn from_map(map: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            tracking_frequency_seconds: parse_or(
                map,
                TRACKING_FREQUENCY_SECONDS,
                defaults.tracking_frequency_seconds,
            ),
            delay_threshold_percent: parse_or(
                map,
                DELAY_THRESHOLD_PERCENT,
                defaults.delay_threshold_percent,
            ),
            origin_geofence_radius_km: parse_or(
                map,
                ORIGIN_GEOFENCE_RADIUS_KM,
                defaults.origin_geofence_radius_km,
            ),
            destination_geofence_radius_km: parse_or(
                map,
                DESTINATION_GEOFENCE_RADIUS_KM,
                defaults.destination_geofence_radius_km,
            ),
            geofence_auto_start_enabled: map
                .get(GEOFENCE_AUTO_START_ENABLED)
                .and_then(|v| parse_bool(v))
                .unwrap_or(defaults.geofence_auto_start_enabled),
            tracking_lost_threshold_minutes: parse_or(
                map,
                TRACKING_LOST_THRESHOLD_MINUTES,
                defaults.tracking_lost_threshold_minutes,
            ),
            stoppage_lookback_hours: parse_or(
                map,
                STOPPAGE_LOOKBACK_HOURS,
                defaults.stoppage_lookback_hours,
            ),
        }
    }

    /// Render back to the stored representation
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (TRACKING_FREQUENCY_SECONDS.to_string(), self.tracking_frequency_seconds.to_string()),
            (DELAY_THRESHOLD_PERCENT.to_string(), self.delay_threshold_percent.to_string()),
            (ORIGIN_GEOFENCE_RADIUS_KM.to_string(), self.origin_geofence_radius_km.to_string()),
            (
                DESTINATION_GEOFENCE_RADIUS_KM.to_string(),
                self.destination_geofence_radius_km.to_string(),
            ),
            (GEOFENCE_AUTO_START_ENABLED.to_string(), self.geofence_auto_start_enabled.to_string()),
            (
                TRACKING_LOST_THRESHOLD_MINUTES.to_string(),
                self.tracking_lost_threshold_minutes.to_string(),
            ),
            (STOPPAGE_LOOKBACK_HOURS.to_string(), self.stoppage_lookback_hours.to_string()),
        ])
    }
}

/// Validate an operator-supplied value before it is written.
/// Known keys must parse as their type; unknown keys are accepted verbatim.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    let Some((_, kind)) = KNOWN_SETTINGS.iter().find(|(k, _)| *k == key) else {
        return Ok(());
    };

    let trimmed = value.trim();
    let ok = match kind {
        SettingKind::Integer { max } => {
            trimmed.parse::<i64>().map(|v| (0..=*max).contains(&v)).unwrap_or(false)
        }
        SettingKind::Float => trimmed.parse::<f64>().map(|v| v.is_finite() && v >= 0.0).unwrap_or(false),
        SettingKind::Bool => parse_bool(trimmed).is_some(),
    };

    if ok {
        Ok(())
    } else {
        Err(TrackingError::InvalidSetting { key: key.to_string(), value: value.to_string() })
    }
}

fn parse_or<T: std::str::FromStr + Copy>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    match map.get(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                warn!(key = %key, value = %raw, "setting_unparseable_using_default");
                default
            }
        },
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
