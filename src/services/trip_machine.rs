//! Trip state machine
//!
//! created -> ongoing <-> on_hold -> completed -> closed, with cancellation
//! from any non-terminal pre-completion state. Start and complete are
//! geofence-validated unless the caller overrides with a recorded reason.
//! Every transition writes a `TripAuditEntry`.

use crate::domain::types::new_uuid_v7;
use crate::domain::{GeoPoint, Location, Trip, TripAuditEntry, TripId, TripStatus};
use crate::infra::error::{GeofenceSide, Result, TrackingError};
use crate::infra::metrics::Metrics;
use crate::io::store::{Store, TripTransition};
use crate::services::geofence::{evaluate, GeofenceEvaluation};
use crate::services::history::LocationHistory;
use crate::services::shipments::ShipmentTracker;
use crate::services::telemetry::{FetchedLocation, TelemetryAdapter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use smallvec::SmallVec;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const AUTO_START_REASON: &str = "geofence auto-start";
const SYSTEM_ACTOR: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripAction {
    Start,
    Complete,
}

impl TripAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripAction::Start => "start",
            TripAction::Complete => "complete",
        }
    }

    fn target<'a>(&self, trip: &'a Trip) -> (&'a Location, GeofenceSide) {
        match self {
            TripAction::Start => (&trip.origin, GeofenceSide::Origin),
            TripAction::Complete => (&trip.destination, GeofenceSide::Destination),
        }
    }
}

impl FromStr for TripAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "start" => Ok(TripAction::Start),
            "complete" => Ok(TripAction::Complete),
            other => Err(format!("unknown trip action '{other}'")),
        }
    }
}

/// Dry-run outcome of a geofence validation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub action: TripAction,
    pub valid: bool,
    pub distance_meters: f64,
    pub radius_meters: f64,
    pub current_location: GeoPoint,
    pub stale: bool,
    pub location_age_secs: i64,
    #[serde(skip)]
    fetched: Option<FetchedLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartOptions {
    #[serde(default)]
    pub skip_validation: bool,
    #[serde(default)]
    pub override_reason: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteOptions {
    #[serde(default)]
    pub skip_validation: bool,
    #[serde(default)]
    pub override_reason: Option<String>,
    #[serde(default)]
    pub skip_pod_check: bool,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Reason and actor for hold/cancel/close
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransitionOptions {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AutoStartOutcome {
    Disabled,
    Started { distance_meters: f64, radius_meters: f64 },
    OutsideGeofence { distance_meters: f64, radius_meters: f64 },
    /// The fix is too old to act on; the next scan tries again
    StaleFix { location_age_secs: i64 },
}

/// Non-empty trimmed override reason, or `OverrideReasonRequired`
fn require_reason(reason: &Option<String>) -> Result<String> {
    reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .ok_or(TrackingError::OverrideReasonRequired)
}

/// Fields that vary between audit rows
struct AuditDraft<'a> {
    action: &'a str,
    previous: TripStatus,
    next: TripStatus,
    overridden: bool,
    reason: Option<String>,
    eval: Option<GeofenceEvaluation>,
    actor: Option<String>,
    details: Value,
}

pub struct TripStateMachine {
    store: Arc<dyn Store>,
    telemetry: Arc<TelemetryAdapter>,
    history: Arc<LocationHistory>,
    shipments: Arc<ShipmentTracker>,
    metrics: Arc<Metrics>,
}

impl TripStateMachine {
    pub fn new(
        store: Arc<dyn Store>,
        telemetry: Arc<TelemetryAdapter>,
        history: Arc<LocationHistory>,
        shipments: Arc<ShipmentTracker>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, telemetry, history, shipments, metrics }
    }

    async fn load(&self, trip_id: &TripId) -> Result<Trip> {
        self.store
            .trip(trip_id)
            .await?
            .ok_or_else(|| TrackingError::not_found("trip", trip_id.as_str()))
    }

    /// Dry-run: fetch the current location and test it against the action's target.
    /// Never changes trip state.
    pub async fn validate_for_action(&self, trip_id: &TripId, action: TripAction) -> Result<ValidationResult> {
        let trip = self.load(trip_id).await?;
        self.validate_trip(&trip, action).await
    }

    async fn validate_trip(&self, trip: &Trip, action: TripAction) -> Result<ValidationResult> {
        let (target, side) = action.target(trip);
        if target.coordinates.is_none() {
            return Err(TrackingError::GeofenceMissingCoordinates { side });
        }
        if !trip.has_tracking() {
            return Err(TrackingError::UnsupportedTrackingType { trip_id: trip.id.clone() });
        }

        let fetched = self.telemetry.fetch_location(trip).await?;
        let eval = evaluate(fetched.point(), target, trip.tracking_type, side)?;
        Ok(ValidationResult {
            action,
            valid: eval.within_geofence,
            distance_meters: eval.distance_meters,
            radius_meters: eval.radius_meters,
            current_location: fetched.point(),
            stale: fetched.stale,
            location_age_secs: fetched.age_secs(),
            fetched: Some(fetched),
        })
    }

    /// Either the override reason or a passing validation
    async fn gate(
        &self,
        trip: &Trip,
        action: TripAction,
        skip_validation: bool,
        override_reason: &Option<String>,
    ) -> Result<(Option<String>, Option<ValidationResult>)> {
        if skip_validation {
            return Ok((Some(require_reason(override_reason)?), None));
        }
        let validation = self.validate_trip(trip, action).await?;
        if !validation.valid {
            return Err(TrackingError::ValidationFailed {
                distance_meters: validation.distance_meters,
                radius_meters: validation.radius_meters,
            });
        }
        Ok((None, Some(validation)))
    }

    /// Record a sample, reusing an already fetched fix when there is one.
    /// Failures are logged and swallowed.
    async fn best_effort_sample(&self, trip: &Trip, fetched: Option<FetchedLocation>) -> Option<u64> {
        let fetched = match fetched {
            Some(f) => f,
            None if trip.has_tracking() => match self.telemetry.fetch_location(trip).await {
                Ok(f) => f,
                Err(e) => {
                    warn!(trip_id = %trip.id, error = %e, "trip_transition_location_fetch_failed");
                    return None;
                }
            },
            None => return None,
        };
        match self.history.append(fetched.sample).await {
            Ok(stored) => Some(stored.sequence_number),
            Err(e) => {
                warn!(trip_id = %trip.id, error = %e, "trip_transition_sample_write_failed");
                None
            }
        }
    }

    /// Start a created trip, or resume an on-hold one.
    pub async fn start(&self, trip_id: &TripId, opts: &StartOptions) -> Result<Trip> {
        let trip = self.load(trip_id).await?;
        let resuming = match trip.status {
            TripStatus::Created => false,
            TripStatus::OnHold => true,
            other => return Err(TrackingError::invalid_transition(other, "start")),
        };

        // Resume does not re-validate against the origin
        let (reason, validation) = if resuming {
            (opts.override_reason.clone(), None)
        } else {
            self.gate(&trip, TripAction::Start, opts.skip_validation, &opts.override_reason).await?
        };

        let eval = validation.as_ref().map(|v| GeofenceEvaluation {
            distance_meters: v.distance_meters,
            radius_meters: v.radius_meters,
            within_geofence: v.valid,
        });
        let stale = validation.as_ref().map(|v| v.stale);
        let seq = self.best_effort_sample(&trip, validation.and_then(|v| v.fetched)).await;

        let now = Utc::now();
        let change = TripTransition {
            status: TripStatus::Ongoing,
            actual_start_time: if resuming { None } else { Some(now) },
            actual_end_time: None,
        };
        let updated = self.store.transition_trip(&trip.id, trip.status, change).await?;
        self.audit(
            &trip.id,
            AuditDraft {
                action: if resuming { "resume" } else { "start" },
                previous: trip.status,
                next: TripStatus::Ongoing,
                overridden: !resuming && opts.skip_validation,
                reason,
                eval,
                actor: opts.actor.clone(),
                details: json!({ "initial_sample_seq": seq, "stale_location": stale }),
            },
            now,
        )
        .await?;

        info!(trip_id = %trip.id, from = %trip.status, overridden = %opts.skip_validation, "trip_started");
        Ok(updated)
    }

    pub async fn complete(&self, trip_id: &TripId, opts: &CompleteOptions) -> Result<Trip> {
        let trip = self.load(trip_id).await?;
        if !matches!(trip.status, TripStatus::Ongoing | TripStatus::OnHold) {
            return Err(TrackingError::invalid_transition(trip.status, "complete"));
        }

        if !opts.skip_pod_check {
            let missing: SmallVec<[String; 4]> = self
                .store
                .shipments_for_trip(&trip.id)
                .await?
                .into_iter()
                .filter(|s| !s.pod_collected)
                .map(|s| s.code)
                .collect();
            if !missing.is_empty() {
                return Err(TrackingError::PodNotCollected { shipment_codes: missing });
            }
        }

        let (reason, validation) =
            self.gate(&trip, TripAction::Complete, opts.skip_validation, &opts.override_reason).await?;
        let eval = validation.as_ref().map(|v| GeofenceEvaluation {
            distance_meters: v.distance_meters,
            radius_meters: v.radius_meters,
            within_geofence: v.valid,
        });
        let seq = self.best_effort_sample(&trip, validation.and_then(|v| v.fetched)).await;

        let now = Utc::now();
        let change = TripTransition {
            status: TripStatus::Completed,
            actual_start_time: None,
            actual_end_time: Some(now),
        };
        let updated = self.store.transition_trip(&trip.id, trip.status, change).await?;
        let delivered = self.shipments.deliver_all(&updated, now).await?;

        self.audit(
            &trip.id,
            AuditDraft {
                action: "complete",
                previous: trip.status,
                next: TripStatus::Completed,
                overridden: opts.skip_validation,
                reason,
                eval,
                actor: opts.actor.clone(),
                details: json!({
                    "final_sample_seq": seq,
                    "pod_check_skipped": opts.skip_pod_check,
                    "shipments_delivered": delivered.len(),
                }),
            },
            now,
        )
        .await?;

        info!(
            trip_id = %trip.id,
            shipments_delivered = %delivered.len(),
            pod_check_skipped = %opts.skip_pod_check,
            "trip_completed"
        );
        Ok(updated)
    }

    pub async fn hold(&self, trip_id: &TripId, opts: &TransitionOptions) -> Result<Trip> {
        self.simple_transition(trip_id, "hold", &[TripStatus::Ongoing], TripStatus::OnHold, opts)
            .await
    }

    pub async fn cancel(&self, trip_id: &TripId, opts: &TransitionOptions) -> Result<Trip> {
        self.simple_transition(
            trip_id,
            "cancel",
            &[TripStatus::Created, TripStatus::Ongoing, TripStatus::OnHold],
            TripStatus::Cancelled,
            opts,
        )
        .await
    }

    pub async fn close(&self, trip_id: &TripId, opts: &TransitionOptions) -> Result<Trip> {
        self.simple_transition(trip_id, "close", &[TripStatus::Completed], TripStatus::Closed, opts)
            .await
    }

    async fn simple_transition(
        &self,
        trip_id: &TripId,
        action: &'static str,
        allowed_from: &[TripStatus],
        next: TripStatus,
        opts: &TransitionOptions,
    ) -> Result<Trip> {
        let trip = self.load(trip_id).await?;
        if !allowed_from.contains(&trip.status) {
            return Err(TrackingError::invalid_transition(trip.status, action));
        }
        let now = Utc::now();
        let change = TripTransition { status: next, actual_start_time: None, actual_end_time: None };
        let updated = self.store.transition_trip(&trip.id, trip.status, change).await?;
        self.audit(
            &trip.id,
            AuditDraft {
                action,
                previous: trip.status,
                next,
                overridden: false,
                reason: opts.reason.clone(),
                eval: None,
                actor: opts.actor.clone(),
                details: Value::Null,
            },
            now,
        )
        .await?;
        info!(trip_id = %trip.id, from = %trip.status, to = %next, "trip_status_changed");
        Ok(updated)
    }

    /// Start a created trip when its vehicle is already inside the origin geofence.
    ///
    /// The caller filters for created trips with tracking and origin coordinates.
    /// A stale fix is reported, not acted upon.
    pub async fn auto_start_on_geofence_entry(
        &self,
        trip: &Trip,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<AutoStartOutcome> {
        if !enabled {
            return Ok(AutoStartOutcome::Disabled);
        }
        if trip.status != TripStatus::Created {
            return Err(TrackingError::invalid_transition(trip.status, "auto-start"));
        }

        let fetched = self.telemetry.fetch_location(trip).await?;
        if fetched.stale {
            debug!(trip_id = %trip.id, age_secs = %fetched.age_secs(), "auto_start_stale_fix");
            return Ok(AutoStartOutcome::StaleFix { location_age_secs: fetched.age_secs() });
        }
        let eval = evaluate(fetched.point(), &trip.origin, trip.tracking_type, GeofenceSide::Origin)?;
        if !eval.within_geofence {
            return Ok(AutoStartOutcome::OutsideGeofence {
                distance_meters: eval.distance_meters,
                radius_meters: eval.radius_meters,
            });
        }

        let seq = self.best_effort_sample(trip, Some(fetched)).await;
        let change = TripTransition {
            status: TripStatus::Ongoing,
            actual_start_time: Some(now),
            actual_end_time: None,
        };
        self.store.transition_trip(&trip.id, TripStatus::Created, change).await?;
        self.audit(
            &trip.id,
            AuditDraft {
                action: "start",
                previous: TripStatus::Created,
                next: TripStatus::Ongoing,
                overridden: true,
                reason: Some(AUTO_START_REASON.to_string()),
                eval: Some(eval),
                actor: Some(SYSTEM_ACTOR.to_string()),
                details: json!({ "initial_sample_seq": seq, "trigger": "geofence_entry" }),
            },
            now,
        )
        .await?;

        info!(
            trip_id = %trip.id,
            distance_m = %format!("{:.0}", eval.distance_meters),
            "trip_auto_started"
        );
        Ok(AutoStartOutcome::Started {
            distance_meters: eval.distance_meters,
            radius_meters: eval.radius_meters,
        })
    }

    async fn audit(&self, trip_id: &TripId, draft: AuditDraft<'_>, now: DateTime<Utc>) -> Result<()> {
        self.store
            .record_trip_audit(TripAuditEntry {
                id: new_uuid_v7(),
                trip_id: trip_id.clone(),
                action: draft.action.to_string(),
                previous_status: draft.previous,
                new_status: draft.next,
                validation_overridden: draft.overridden,
                override_reason: draft.reason,
                distance_meters: draft.eval.map(|e| e.distance_meters),
                radius_meters: draft.eval.map(|e| e.radius_meters),
                actor: draft.actor,
                details: draft.details,
                created_at: now,
            })
            .await?;
        self.metrics.record_trip_transition();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Shipment, TrackingType};
    use crate::services::test_support::{gps_trip, Rig, ORIGIN};
    use smallvec::smallvec;

    async fn started(rig: &Rig, id: &str) -> Trip {
        rig.put_trip(gps_trip(id, TripStatus::Created));
        rig.gps.set_point(ORIGIN);
        rig.machine.start(&TripId::new(id), &StartOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_from_created_records_sample_and_audit() {
        let rig = Rig::new();
        let trip = started(&rig, "t1").await;
        assert_eq!(trip.status, TripStatus::Ongoing);
        assert!(trip.actual_start_time.is_some());

        assert_eq!(rig.store.samples(&trip.id).await.unwrap().len(), 1);
        let audit = rig.store.trip_audit(&trip.id).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].validation_overridden);
        assert!(audit[0].distance_meters.unwrap() < 1.0);
    }

    #[tokio::test]
    async fn test_start_rejected_from_ongoing_and_completed() {
        let rig = Rig::new();
        for (id, status) in [("a", TripStatus::Ongoing), ("b", TripStatus::Completed)] {
            rig.put_trip(gps_trip(id, status));
            let err = rig
                .machine
                .start(&TripId::new(id), &StartOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), "invalid_transition");
        }
    }

    #[tokio::test]
    async fn test_start_accepted_from_on_hold() {
        let rig = Rig::new();
        let first = started(&rig, "t1").await;
        rig.machine.hold(&first.id, &TransitionOptions::default()).await.unwrap();

        rig.gps.set_point(GeoPoint::new(13.5, 78.0));
        let resumed = rig.machine.start(&first.id, &StartOptions::default()).await.unwrap();
        assert_eq!(resumed.status, TripStatus::Ongoing);
        assert_eq!(resumed.actual_start_time, first.actual_start_time);
        let audit = rig.store.trip_audit(&first.id).await.unwrap();
        assert_eq!(audit.last().unwrap().action, "resume");
    }

    #[tokio::test]
    async fn test_start_outside_geofence_needs_override() {
        let rig = Rig::new();
        rig.put_trip(gps_trip("t1", TripStatus::Created));
        rig.gps.set_point(GeoPoint::new(13.5, 78.0));
        let id = TripId::new("t1");

        let err = rig.machine.start(&id, &StartOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        let no_reason = StartOptions { skip_validation: true, override_reason: Some("  ".into()), actor: None };
        let err = rig.machine.start(&id, &no_reason).await.unwrap_err();
        assert_eq!(err.code(), "override_reason_required");

        let opts = StartOptions {
            skip_validation: true,
            override_reason: Some("GPS unit faulty".into()),
            actor: Some("ops-7".into()),
        };
        rig.machine.start(&id, &opts).await.unwrap();
        let audit = rig.store.trip_audit(&id).await.unwrap();
        assert!(audit[0].validation_overridden);
        assert_eq!(audit[0].override_reason.as_deref(), Some("GPS unit faulty"));
    }

    #[tokio::test]
    async fn test_start_survives_failed_initial_fetch() {
        let rig = Rig::new();
        rig.put_trip(gps_trip("t1", TripStatus::Created));
        rig.gps.fail_with_unavailable();
        let opts = StartOptions {
            skip_validation: true,
            override_reason: Some("provider down".into()),
            actor: None,
        };
        let trip = rig.machine.start(&TripId::new("t1"), &opts).await.unwrap();
        assert_eq!(trip.status, TripStatus::Ongoing);
        assert!(rig.store.samples(&trip.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_blocked_by_missing_pod() {
        let rig = Rig::new();
        let trip = started(&rig, "t1").await;
        for (id, pod) in [("sh-1", false), ("sh-2", true), ("sh-3", false)] {
            let mut s = Shipment::new(id, &trip.id, Location::default(), Location::default());
            s.pod_collected = pod;
            rig.store.put_shipment(s);
        }
        let opts = CompleteOptions {
            skip_validation: true,
            override_reason: Some("test".into()),
            ..Default::default()
        };

        let err = rig.machine.complete(&trip.id, &opts).await.unwrap_err();
        match err {
            TrackingError::PodNotCollected { shipment_codes } => {
                let expected: SmallVec<[String; 4]> = smallvec!["SH-1".to_string(), "SH-3".to_string()];
                assert_eq!(shipment_codes, expected);
            }
            other => panic!("unexpected {other:?}"),
        }

        let skip = CompleteOptions { skip_pod_check: true, ..opts };
        let done = rig.machine.complete(&trip.id, &skip).await.unwrap();
        assert_eq!(done.status, TripStatus::Completed);
        assert!(done.actual_end_time.is_some());
        let shipments = rig.store.shipments_for_trip(&trip.id).await.unwrap();
        assert!(shipments.iter().all(|s| s.status == crate::domain::ShipmentStatus::Delivered));
    }

    #[tokio::test]
    async fn test_complete_succeeds_when_all_pods_collected() {
        let rig = Rig::new();
        let trip = started(&rig, "t1").await;
        let mut s = Shipment::new("sh-1", &trip.id, Location::default(), Location::default());
        s.pod_collected = true;
        rig.store.put_shipment(s);

        rig.gps.set_point(crate::services::test_support::DESTINATION);
        let done = rig.machine.complete(&trip.id, &CompleteOptions::default()).await.unwrap();
        assert_eq!(done.status, TripStatus::Completed);
        // start + final
        assert_eq!(rig.store.samples(&trip.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_complete_requires_ongoing_or_on_hold() {
        let rig = Rig::new();
        rig.put_trip(gps_trip("t1", TripStatus::Created));
        let opts = CompleteOptions { skip_pod_check: true, ..Default::default() };
        let err = rig.machine.complete(&TripId::new("t1"), &opts).await.unwrap_err();
        assert!(matches!(err, TrackingError::InvalidTransition { action: "complete", .. }));
    }

    #[tokio::test]
    async fn test_cancel_and_close_guards() {
        let rig = Rig::new();
        rig.put_trip(gps_trip("t1", TripStatus::Created));
        let id = TripId::new("t1");
        let opts = TransitionOptions { reason: Some("customer cancelled".into()), actor: None };

        let err = rig.machine.close(&id, &opts).await.unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        let cancelled = rig.machine.cancel(&id, &opts).await.unwrap();
        assert_eq!(cancelled.status, TripStatus::Cancelled);
        assert!(rig.machine.start(&id, &StartOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_validate_requires_coordinates_and_tracking() {
        let rig = Rig::new();
        let mut no_coords = gps_trip("t1", TripStatus::Created);
        no_coords.origin.coordinates = None;
        rig.put_trip(no_coords);
        let err = rig.machine.validate_for_action(&TripId::new("t1"), TripAction::Start).await.unwrap_err();
        assert_eq!(err.code(), "geofence_missing_coordinates");

        let mut untracked = gps_trip("t2", TripStatus::Created);
        untracked.tracking_type = TrackingType::None;
        rig.put_trip(untracked);
        let err = rig.machine.validate_for_action(&TripId::new("t2"), TripAction::Start).await.unwrap_err();
        assert_eq!(err.code(), "unsupported_tracking_type");
    }

    #[tokio::test]
    async fn test_validate_is_a_dry_run() {
        let rig = Rig::new();
        rig.put_trip(gps_trip("t1", TripStatus::Created));
        rig.gps.set_point(ORIGIN);
        let result = rig.machine.validate_for_action(&TripId::new("t1"), TripAction::Start).await.unwrap();
        assert!(result.valid);
        assert_eq!(result.radius_meters, 200.0);
        let trip = rig.store.trip(&TripId::new("t1")).await.unwrap().unwrap();
        assert_eq!(trip.status, TripStatus::Created);
        assert!(rig.store.samples(&trip.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_auto_start_inside_origin() {
        let rig = Rig::new();
        let trip = gps_trip("t1", TripStatus::Created);
        rig.put_trip(trip.clone());
        rig.gps.set_point(ORIGIN);

        let disabled = rig.machine.auto_start_on_geofence_entry(&trip, false, Utc::now()).await.unwrap();
        assert_eq!(disabled, AutoStartOutcome::Disabled);

        let outcome = rig.machine.auto_start_on_geofence_entry(&trip, true, Utc::now()).await.unwrap();
        assert!(matches!(outcome, AutoStartOutcome::Started { .. }));
        let audit = rig.store.trip_audit(&trip.id).await.unwrap();
        assert_eq!(audit[0].override_reason.as_deref(), Some(AUTO_START_REASON));
        assert_eq!(audit[0].actor.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn test_auto_start_reports_stale_fix() {
        let rig = Rig::new();
        let trip = gps_trip("t1", TripStatus::Created);
        rig.put_trip(trip.clone());
        rig.gps.set_point_at(ORIGIN, Utc::now() - chrono::Duration::minutes(20));

        let outcome = rig.machine.auto_start_on_geofence_entry(&trip, true, Utc::now()).await.unwrap();
        match outcome {
            AutoStartOutcome::StaleFix { location_age_secs } => assert!(location_age_secs >= 20 * 60),
            other => panic!("unexpected {other:?}"),
        }
        let stored = rig.store.trip(&trip.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TripStatus::Created);
    }
}
