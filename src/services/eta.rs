//! ETA projection and schedule-deviation classification
//!
//! Both functions are pure and take `now` explicitly.

use crate::domain::{AlertSeverity, GeoPoint, Trip};
use crate::infra::error::{GeofenceSide, Result};
use crate::services::geofence::distance_to;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Assumed average road speed for remaining-time estimates
pub const AVERAGE_SPEED_KMH: f64 = 40.0;

/// Straight-line distance to the destination at `AVERAGE_SPEED_KMH`, added to `now`
pub fn compute_eta(trip: &Trip, current: GeoPoint, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let meters = distance_to(current, &trip.destination, GeofenceSide::Destination)?;
    let hours = meters / 1000.0 / AVERAGE_SPEED_KMH;
    Ok(now + Duration::seconds((hours * 3600.0).round() as i64))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "classification", rename_all = "snake_case")]
pub enum DelayClass {
    OnTime,
    /// Projected arrival overshoots the remaining schedule by more than the threshold
    BehindSchedule { overage_percent: f64, severity: AlertSeverity },
    /// The scheduled arrival has already elapsed
    PastDue { late_minutes: i64, severity: AlertSeverity },
}

impl DelayClass {
    pub fn is_delayed(&self) -> bool {
        !matches!(self, DelayClass::OnTime)
    }

    pub fn severity(&self) -> Option<AlertSeverity> {
        match self {
            DelayClass::OnTime => None,
            DelayClass::BehindSchedule { severity, .. } | DelayClass::PastDue { severity, .. } => {
                Some(*severity)
            }
        }
    }
}

fn overage_severity(overage_percent: f64) -> AlertSeverity {
    if overage_percent > 50.0 {
        AlertSeverity::High
    } else if overage_percent >= 30.0 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

fn lateness_severity(late_minutes: i64) -> AlertSeverity {
    match late_minutes {
        m if m >= 120 => AlertSeverity::High,
        m if m >= 30 => AlertSeverity::Medium,
        _ => AlertSeverity::Low,
    }
}

/// Classify a trip against its schedule baseline (`planned_eta`, else
/// `planned_end_time`). Returns `None` when there is no baseline, no current
/// ETA, or both have already elapsed (an ETA in the past says nothing about
/// the remaining schedule).
pub fn classify_delay(trip: &Trip, threshold_percent: f64, now: DateTime<Utc>) -> Option<DelayClass> {
    let baseline = trip.schedule_baseline()?;
    let eta = trip.current_eta?;

    if baseline <= now {
        if eta <= now {
            return None;
        }
        let late_minutes = (now - baseline).num_minutes();
        return Some(DelayClass::PastDue { late_minutes, severity: lateness_severity(late_minutes) });
    }

    let baseline_remaining = (baseline - now).num_seconds() as f64;
    let overrun = (eta - baseline).num_seconds() as f64;
    let overage_percent = overrun / baseline_remaining * 100.0;

    if overage_percent > threshold_percent {
        Some(DelayClass::BehindSchedule {
            overage_percent,
            severity: overage_severity(overage_percent),
        })
    } else {
        Some(DelayClass::OnTime)
    }
}
