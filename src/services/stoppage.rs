//! Stoppage detection - spatio-temporal clustering of recent samples
//!
//! A cluster grows while each next sample stays within `STOPPAGE_RADIUS_METERS`
//! of the cluster's first sample. Clusters spanning more than
//! `STOPPAGE_MIN_MINUTES` become stoppages. Each stoppage carries a dedup key
//! (start minute + center rounded to 4 decimals) stored in the alert metadata,
//! so rerunning over unchanged samples creates nothing new.

use crate::domain::{
    AlertSeverity, AlertType, GeoPoint, LocationSample, NewAlert, Trip,
};
use crate::infra::error::Result;
use crate::io::store::Store;
use crate::services::alerts::AlertManager;
use crate::services::geofence::haversine_meters;
use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashSet;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub const STOPPAGE_RADIUS_METERS: f64 = 100.0;
pub const STOPPAGE_MIN_MINUTES: i64 = 30;
/// Stoppages at least this long are high severity
pub const STOPPAGE_HIGH_MINUTES: i64 = 60;

const DEDUP_KEY: &str = "dedup_key";

#[derive(Debug, Clone, PartialEq)]
pub struct Stoppage {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub center: GeoPoint,
    pub sample_count: usize,
}

impl Stoppage {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn severity(&self) -> AlertSeverity {
        if self.duration_minutes() >= STOPPAGE_HIGH_MINUTES {
            AlertSeverity::High
        } else {
            AlertSeverity::Medium
        }
    }

    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{:.4}:{:.4}",
            self.start.timestamp().div_euclid(60),
            self.center.latitude,
            self.center.longitude
        )
    }
}

/// "1h 05m" / "35m"
pub fn format_duration(minutes: i64) -> String {
    if minutes >= 60 {
        format!("{}h {:02}m", minutes / 60, minutes % 60)
    } else {
        format!("{minutes}m")
    }
}

struct Cluster<'a> {
    anchor: GeoPoint,
    members: Vec<&'a LocationSample>,
}

impl Cluster<'_> {
    fn into_stoppage(self) -> Option<Stoppage> {
        let (first, last) = (self.members.first()?, self.members.last()?);
        if last.event_time - first.event_time <= Duration::minutes(STOPPAGE_MIN_MINUTES) {
            return None;
        }
        let n = self.members.len() as f64;
        let lat = self.members.iter().map(|s| s.latitude).sum::<f64>() / n;
        let lng = self.members.iter().map(|s| s.longitude).sum::<f64>() / n;
        Some(Stoppage {
            start: first.event_time,
            end: last.event_time,
            center: GeoPoint::new(lat, lng),
            sample_count: self.members.len(),
        })
    }
}

/// Group samples (any order) into qualifying stoppages, ordered by start time
pub fn cluster_stoppages(samples: &[LocationSample]) -> Vec<Stoppage> {
    let mut ordered: Vec<&LocationSample> = samples.iter().collect();
    ordered.sort_by(|a, b| {
        a.event_time.cmp(&b.event_time).then(a.sequence_number.cmp(&b.sequence_number))
    });

    let mut stoppages = Vec::new();
    let mut current: Option<Cluster> = None;
    for sample in ordered {
        let point = sample.point();
        if let Some(cluster) = current.as_mut() {
            if haversine_meters(cluster.anchor, point) <= STOPPAGE_RADIUS_METERS {
                cluster.members.push(sample);
                continue;
            }
        }
        if let Some(done) = current.take() {
            stoppages.extend(done.into_stoppage());
        }
        current = Some(Cluster { anchor: point, members: vec![sample] });
    }
    if let Some(done) = current {
        stoppages.extend(done.into_stoppage());
    }
    stoppages
}

pub struct StoppageDetector {
    store: Arc<dyn Store>,
    alerts: Arc<AlertManager>,
}

impl StoppageDetector {
    pub fn new(store: Arc<dyn Store>, alerts: Arc<AlertManager>) -> Self {
        Self { store, alerts }
    }

    /// Cluster the trip's samples since `since` and raise one alert per new stoppage.
    /// Returns the number of alerts created.
    pub async fn detect(&self, trip: &Trip, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let samples = self.store.samples_since(&trip.id, since).await?;
        let stoppages = cluster_stoppages(&samples);
        if stoppages.is_empty() {
            return Ok(0);
        }

        // Dedup against stoppage alerts in any status
        let known: FxHashSet<String> = self
            .store
            .alerts_for_trip(&trip.id, Some(AlertType::Stoppage))
            .await?
            .into_iter()
            .filter_map(|a| a.metadata.get(DEDUP_KEY).and_then(|k| k.as_str()).map(str::to_string))
            .collect();

        let mut created = 0;
        for stoppage in stoppages {
            let key = stoppage.dedup_key();
            if known.contains(&key) {
                debug!(trip_id = %trip.id, dedup_key = %key, "stoppage_already_alerted");
                continue;
            }
            let minutes = stoppage.duration_minutes();
            let alert = NewAlert::new(&trip.id, AlertType::Stoppage, stoppage.severity(), "Vehicle stopped")
                .with_description(format!(
                    "Vehicle stationary for {} since {}",
                    format_duration(minutes),
                    stoppage.start.format("%Y-%m-%d %H:%M UTC")
                ))
                .with_location(Some(stoppage.center))
                .with_values(STOPPAGE_MIN_MINUTES as f64, minutes as f64)
                .with_metadata(json!({
                    DEDUP_KEY: key,
                    "started_at": stoppage.start.to_rfc3339(),
                    "ended_at": stoppage.end.to_rfc3339(),
                    "duration_minutes": minutes,
                    "sample_count": stoppage.sample_count,
                }));
            self.alerts.create(alert, now).await?;
            created += 1;
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, NewSample, SampleSource, TrackingType, TripId};
    use crate::infra::metrics::Metrics;
    use crate::io::store::MemoryStore;

    const DEPOT: GeoPoint = GeoPoint { latitude: 12.9716, longitude: 77.5946 };

    /// Offset a point by meters north/east
    fn offset(p: GeoPoint, north_m: f64, east_m: f64) -> GeoPoint {
        let dlat = north_m / 111_320.0;
        let dlng = east_m / (111_320.0 * p.latitude.to_radians().cos());
        GeoPoint::new(p.latitude + dlat, p.longitude + dlng)
    }

    fn sample_at(trip_id: &TripId, p: GeoPoint, at: DateTime<Utc>) -> NewSample {
        NewSample {
            trip_id: trip_id.clone(),
            latitude: p.latitude,
            longitude: p.longitude,
            event_time: at,
            received_at: at,
            source: SampleSource::Gps,
            address: None,
            speed_kmh: None,
            heading_deg: None,
            accuracy_meters: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    /// Two 35-minute stops with jitter under 50m, joined by a 10-minute 2km drive
    fn two_stop_track(trip_id: &TripId, t0: DateTime<Utc>) -> Vec<NewSample> {
        let far = offset(DEPOT, 2000.0, 0.0);
        let jitter = [(0.0, 0.0), (20.0, 10.0), (-15.0, 25.0), (30.0, -20.0), (-25.0, -10.0)];
        let mut out = Vec::new();
        for i in 0..8 {
            let (n, e) = jitter[i % jitter.len()];
            out.push(sample_at(trip_id, offset(DEPOT, n, e), t0 + Duration::minutes(5 * i as i64)));
        }
        out.push(sample_at(trip_id, offset(DEPOT, 1000.0, 0.0), t0 + Duration::minutes(40)));
        for i in 0..8 {
            let (n, e) = jitter[(i + 2) % jitter.len()];
            out.push(sample_at(trip_id, offset(far, n, e), t0 + Duration::minutes(45 + 5 * i as i64)));
        }
        out
    }

    async fn seeded() -> (StoppageDetector, Arc<MemoryStore>, Trip, DateTime<Utc>) {
        let store = Arc::new(MemoryStore::new());
        let trip = Trip::new("t1", TrackingType::Gps, Location::default(), Location::default());
        store.put_trip(trip.clone());
        let t0 = Utc::now() - Duration::hours(3);
        for s in two_stop_track(&trip.id, t0) {
            store.append_sample(s).await.unwrap();
        }
        let alerts = Arc::new(AlertManager::new(store.clone(), Arc::new(Metrics::new())));
        (StoppageDetector::new(store.clone(), alerts), store, trip, t0)
    }

    #[tokio::test]
    async fn test_two_stops_produce_two_alerts() {
        let (detector, store, trip, t0) = seeded().await;
        let created = detector.detect(&trip, t0 - Duration::hours(1), Utc::now()).await.unwrap();
        assert_eq!(created, 2);

        let alerts = store.alerts_for_trip(&trip.id, Some(AlertType::Stoppage)).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Medium));
        assert!(alerts[0].description.contains("35m"));
    }

    #[tokio::test]
    async fn test_rerun_creates_no_duplicates() {
        let (detector, store, trip, t0) = seeded().await;
        let since = t0 - Duration::hours(1);
        assert_eq!(detector.detect(&trip, since, Utc::now()).await.unwrap(), 2);
        assert_eq!(detector.detect(&trip, since, Utc::now()).await.unwrap(), 0);
        assert_eq!(store.alerts_for_trip(&trip.id, None).await.unwrap().len(), 2);
    }

    fn stored_at(trip_id: &TripId, seq: u64, at: DateTime<Utc>) -> LocationSample {
        let s = sample_at(trip_id, DEPOT, at);
        LocationSample {
            id: format!("s{seq}"),
            trip_id: s.trip_id,
            latitude: s.latitude,
            longitude: s.longitude,
            event_time: s.event_time,
            received_at: s.received_at,
            source: s.source,
            sequence_number: seq,
            address: None,
            speed_kmh: None,
            heading_deg: None,
            accuracy_meters: None,
            raw_payload: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_short_stop_does_not_qualify() {
        let trip_id = TripId::new("t1");
        let t0 = Utc::now();
        let samples: Vec<LocationSample> =
            (0..7).map(|i| stored_at(&trip_id, i as u64 + 1, t0 + Duration::minutes(5 * i))).collect();
        // exactly 30 minutes is not "more than 30"
        assert!(cluster_stoppages(&samples).is_empty());
    }

    #[test]
    fn test_sub_minute_overrun_qualifies() {
        let trip_id = TripId::new("t1");
        let t0 = Utc::now();
        let samples = vec![
            stored_at(&trip_id, 1, t0),
            stored_at(&trip_id, 2, t0 + Duration::minutes(30) + Duration::seconds(50)),
        ];
        let stoppages = cluster_stoppages(&samples);
        assert_eq!(stoppages.len(), 1);
        assert_eq!(stoppages[0].sample_count, 2);
    }

    #[test]
    fn test_severity_and_duration_format() {
        let start = Utc::now();
        let stoppage = Stoppage {
            start,
            end: start + Duration::minutes(65),
            center: DEPOT,
            sample_count: 14,
        };
        assert_eq!(stoppage.severity(), AlertSeverity::High);
        assert_eq!(format_duration(65), "1h 05m");
        assert_eq!(format_duration(35), "35m");
        assert!(stoppage.dedup_key().ends_with(":12.9716:77.5946"));
    }
}
