//! Per-trip scan handlers for TrackingService

use super::{TrackingService, TripOutcome};
use crate::domain::{AlertSeverity, AlertType, GeoPoint, LocationSample, NewAlert, TrackingSummary, Trip};
use crate::infra::error::{Result, TrackingError};
use crate::infra::settings::{TrackingSettings, STOPPAGE_LOOKBACK_HOURS};
use crate::services::eta::{classify_delay, compute_eta, DelayClass};
use crate::services::geofence::haversine_km;
use crate::services::telemetry::FetchedLocation;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::debug;

impl TrackingService {
    /// Persist a fetched fix, then update distance and ETA from it
    pub(crate) async fn record_fetched(
        &self,
        trip: &Trip,
        fetched: FetchedLocation,
        previous: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Result<LocationSample> {
        let point = fetched.point();
        let stored = self.history.append(fetched.sample).await?;

        if let Some(prev) = previous {
            let km = haversine_km(prev, point);
            if km > 0.0 {
                self.store.add_trip_distance(&trip.id, km).await?;
            }
        }
        if trip.destination.coordinates.is_some() {
            let eta = compute_eta(trip, point, now)?;
            self.store.set_trip_eta(&trip.id, eta).await?;
        }
        Ok(stored)
    }

    pub(crate) async fn refresh_trip(
        &self,
        trip: &Trip,
        settings: &TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<TripOutcome> {
        if !trip.has_tracking() {
            return Ok(TripOutcome::NotEligible { reason: "no_tracking" });
        }

        let summary = self.store.tracking_summary(&trip.id).await?;
        if let Some(last) = &summary {
            let since = (now - last.last_updated_at).num_seconds();
            if since < settings.tracking_frequency_seconds as i64 {
                debug!(trip_id = %trip.id, seconds_since_last = %since, "location_refresh_not_due");
                return Ok(TripOutcome::NotDue { seconds_since_last: since });
            }
        }

        match self.telemetry.fetch_location(trip).await {
            Ok(fetched) => {
                let stale = fetched.stale;
                let previous = summary.as_ref().map(|s| s.last_point);
                let stored = self.record_fetched(trip, fetched, previous, now).await?;
                self.alerts
                    .resolve_active(&trip.id, AlertType::TrackingLost, "telemetry received", now)
                    .await?;
                Ok(TripOutcome::Recorded { sequence_number: stored.sequence_number, stale })
            }
            Err(e) => {
                self.raise_fetch_alerts(trip, &e, summary.as_ref(), settings, now).await?;
                Err(e)
            }
        }
    }

    /// consent_revoked on a missing SIM consent; tracking_lost once the last
    /// telemetry (or the trip start, if none) is older than the threshold
    async fn raise_fetch_alerts(
        &self,
        trip: &Trip,
        error: &TrackingError,
        summary: Option<&TrackingSummary>,
        settings: &TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if matches!(error, TrackingError::NoConsent { .. }) {
            let alert = NewAlert::new(
                &trip.id,
                AlertType::ConsentRevoked,
                AlertSeverity::High,
                "Location consent not available",
            )
            .with_description(format!("No allowed SIM consent for trip {}", trip.code))
            .with_metadata(json!({ "driver_id": trip.driver_id, "consent_id": trip.consent_id }));
            self.alerts.create_if_absent(alert, now).await?;
        }

        let Some(last_seen) = summary.map(|s| s.last_updated_at).or(trip.actual_start_time) else {
            return Ok(());
        };
        let silent_minutes = (now - last_seen).num_minutes();
        if silent_minutes <= settings.tracking_lost_threshold_minutes {
            return Ok(());
        }
        let alert = NewAlert::new(&trip.id, AlertType::TrackingLost, AlertSeverity::High, "Tracking lost")
            .with_description(format!(
                "No location for {silent_minutes} minutes (threshold {} minutes)",
                settings.tracking_lost_threshold_minutes
            ))
            .with_location(summary.map(|s| s.last_point))
            .with_values(settings.tracking_lost_threshold_minutes as f64, silent_minutes as f64)
            .with_metadata(json!({
                "error": error.code(),
                "last_seen_at": last_seen.to_rfc3339(),
            }));
        self.alerts.create_if_absent(alert, now).await?;
        Ok(())
    }

    pub(crate) async fn geofence_trip(
        &self,
        trip: &Trip,
        settings: &TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<TripOutcome> {
        let Some(latest) = self.store.latest_sample(&trip.id).await? else {
            debug!(trip_id = %trip.id, "geofence_check_no_telemetry");
            return Ok(TripOutcome::NoTelemetry);
        };

        let transitions = self.shipments.evaluate_shipments(trip, latest.point(), now).await?;
        let since = Duration::try_hours(settings.stoppage_lookback_hours)
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .ok_or_else(|| TrackingError::InvalidSetting {
                key: STOPPAGE_LOOKBACK_HOURS.to_string(),
                value: settings.stoppage_lookback_hours.to_string(),
            })?;
        let stoppage_alerts = self.stoppage.detect(trip, since, now).await?;
        Ok(TripOutcome::GeofenceChecked { shipment_transitions: transitions.len(), stoppage_alerts })
    }

    /// On time resolves any active delay alert; delayed creates one unless an
    /// active one exists, which is left untouched.
    pub(crate) async fn delay_trip(
        &self,
        trip: &Trip,
        settings: &TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<TripOutcome> {
        let Some(class) = classify_delay(trip, settings.delay_threshold_percent, now) else {
            return Ok(TripOutcome::DelayChecked { delay: None, alert_created: false, alerts_resolved: 0 });
        };

        let (alert_created, alerts_resolved) = match class {
            DelayClass::OnTime => {
                let resolved = self
                    .alerts
                    .resolve_active(&trip.id, AlertType::DelayWarning, "back on schedule", now)
                    .await?;
                (false, resolved)
            }
            DelayClass::BehindSchedule { overage_percent, severity } => {
                let alert = NewAlert::new(&trip.id, AlertType::DelayWarning, severity, "Trip behind schedule")
                    .with_description(format!(
                        "Projected arrival overshoots the remaining schedule by {overage_percent:.0}%"
                    ))
                    .with_values(settings.delay_threshold_percent, overage_percent)
                    .with_metadata(delay_metadata(trip, &class));
                (self.alerts.create_if_absent(alert, now).await?.is_some(), 0)
            }
            DelayClass::PastDue { late_minutes, severity } => {
                let alert = NewAlert::new(&trip.id, AlertType::DelayWarning, severity, "Trip past due")
                    .with_description(format!("Scheduled arrival passed {late_minutes} minutes ago"))
                    .with_values(0.0, late_minutes as f64)
                    .with_metadata(delay_metadata(trip, &class));
                (self.alerts.create_if_absent(alert, now).await?.is_some(), 0)
            }
        };
        Ok(TripOutcome::DelayChecked { delay: Some(class), alert_created, alerts_resolved })
    }

    pub(crate) async fn auto_start_trip(
        &self,
        trip: &Trip,
        settings: &TrackingSettings,
        now: DateTime<Utc>,
    ) -> Result<TripOutcome> {
        if !trip.has_tracking() {
            return Ok(TripOutcome::NotEligible { reason: "no_tracking" });
        }
        if trip.origin.coordinates.is_none() {
            return Ok(TripOutcome::NotEligible { reason: "no_origin_coordinates" });
        }
        let result = self
            .machine
            .auto_start_on_geofence_entry(trip, settings.geofence_auto_start_enabled, now)
            .await?;
        Ok(TripOutcome::AutoStart { result })
    }
}

fn delay_metadata(trip: &Trip, class: &DelayClass) -> serde_json::Value {
    json!({
        "classification": class,
        "baseline": trip.schedule_baseline().map(|b| b.to_rfc3339()),
        "current_eta": trip.current_eta.map(|e| e.to_rfc3339()),
    })
}
