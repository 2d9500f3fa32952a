//! Uniform location fetch over the SIM and GPS providers
//!
//! Dispatches on the trip's tracking type, resolves the provider identifier
//! (MSISDN via consent, or vehicle registration), calls the provider behind
//! its own throttle and timeout, and normalizes the payload into a `NewSample`.

use crate::domain::{ConsentStatus, GeoPoint, NewSample, TokenType, TrackingType, Trip};
use crate::infra::config::Config;
use crate::infra::error::{Result, TrackingError};
use crate::infra::metrics::{Metrics, ProviderKind};
use crate::io::provider::{GpsApi, ProviderResponse, SimApi};
use crate::io::store::Store;
use crate::services::credentials::CredentialManager;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

/// Fixes older than this relative to receipt are flagged stale
pub const STALE_AFTER_SECS: i64 = 5 * 60;

#[cold]
fn log_provider_failed(provider: ProviderKind, trip: &Trip, e: &TrackingError) {
    warn!(
        provider = %provider.as_str(),
        trip_id = %trip.id,
        error_code = %e.code(),
        error = %e,
        "provider_request_failed"
    );
}

/// Per-provider call limits
#[derive(Debug, Clone, Copy)]
pub struct ProviderLimits {
    pub max_in_flight: usize,
    pub min_interval: Duration,
    pub timeout: Duration,
}

impl ProviderLimits {
    pub fn sim_from_config(config: &Config) -> Self {
        let sim = config.sim_provider();
        Self {
            max_in_flight: sim.max_in_flight.max(1),
            min_interval: Duration::from_millis(sim.min_interval_ms),
            timeout: config.sim_timeout(),
        }
    }

    pub fn gps_from_config(config: &Config) -> Self {
        let gps = config.gps_provider();
        Self {
            max_in_flight: gps.max_in_flight.max(1),
            min_interval: Duration::from_millis(gps.min_interval_ms),
            timeout: config.gps_timeout(),
        }
    }
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self { max_in_flight: 4, min_interval: Duration::ZERO, timeout: Duration::from_secs(10) }
    }
}

/// Bounds in-flight calls and spaces call starts for one provider
pub struct ProviderThrottle {
    provider: ProviderKind,
    permits: Semaphore,
    min_interval: Duration,
    next_start: Mutex<tokio::time::Instant>,
    timeout: Duration,
}

impl ProviderThrottle {
    pub fn new(provider: ProviderKind, limits: ProviderLimits) -> Self {
        Self {
            provider,
            permits: Semaphore::new(limits.max_in_flight.max(1)),
            min_interval: limits.min_interval,
            next_start: Mutex::new(tokio::time::Instant::now()),
            timeout: limits.timeout,
        }
    }

    /// Run `call` once a slot is free and the spacing interval has elapsed,
    /// failing with `ProviderUnavailable` if it outlives the timeout.
    pub async fn run<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.permits.acquire().await.map_err(|_| {
            TrackingError::ProviderUnavailable(format!("{} throttle closed", self.provider.as_str()))
        })?;

        if !self.min_interval.is_zero() {
            let mut next = self.next_start.lock().await;
            let now = tokio::time::Instant::now();
            if *next > now {
                tokio::time::sleep_until(*next).await;
            }
            *next = (*next).max(now) + self.min_interval;
        }

        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TrackingError::ProviderUnavailable(format!(
                "{} call timed out after {}ms",
                self.provider.as_str(),
                self.timeout.as_millis()
            ))),
        }
    }
}

/// A normalized fix ready to be appended, plus its freshness
#[derive(Debug, Clone)]
pub struct FetchedLocation {
    pub sample: NewSample,
    pub stale: bool,
}

impl FetchedLocation {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.sample.latitude, self.sample.longitude)
    }

    /// Seconds between the provider fix time and receipt
    pub fn age_secs(&self) -> i64 {
        (self.sample.received_at - self.sample.event_time).num_seconds()
    }
}

pub struct TelemetryAdapter {
    store: Arc<dyn Store>,
    credentials: Arc<CredentialManager>,
    sim: Arc<dyn SimApi>,
    gps: Arc<dyn GpsApi>,
    sim_throttle: ProviderThrottle,
    gps_throttle: ProviderThrottle,
    metrics: Arc<Metrics>,
}

impl TelemetryAdapter {
    pub fn new(
        store: Arc<dyn Store>,
        credentials: Arc<CredentialManager>,
        sim: Arc<dyn SimApi>,
        gps: Arc<dyn GpsApi>,
        sim_limits: ProviderLimits,
        gps_limits: ProviderLimits,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            credentials,
            sim,
            gps,
            sim_throttle: ProviderThrottle::new(ProviderKind::Sim, sim_limits),
            gps_throttle: ProviderThrottle::new(ProviderKind::Gps, gps_limits),
            metrics,
        }
    }

    /// Fetch the current location for a trip. Does not persist anything.
    pub async fn fetch_location(&self, trip: &Trip) -> Result<FetchedLocation> {
        match trip.tracking_type {
            TrackingType::Sim => self.fetch_sim(trip).await,
            TrackingType::Gps => self.fetch_gps(trip).await,
            TrackingType::None => {
                Err(TrackingError::UnsupportedTrackingType { trip_id: trip.id.clone() })
            }
        }
    }

    /// Bound consent first, then the driver's most recent allowed consent
    async fn resolve_msisdn(&self, trip: &Trip) -> Result<String> {
        if let Some(consent_id) = &trip.consent_id {
            if let Some(consent) = self.store.consent(consent_id).await? {
                if consent.status == ConsentStatus::Allowed && !consent.msisdn.is_empty() {
                    return Ok(consent.msisdn);
                }
            }
        }
        if let Some(driver_id) = &trip.driver_id {
            if let Some(consent) = self.store.latest_allowed_consent(driver_id).await? {
                if !consent.msisdn.is_empty() {
                    return Ok(consent.msisdn);
                }
            }
        }
        Err(TrackingError::NoConsent { trip_id: trip.id.clone() })
    }

    async fn resolve_registration(&self, trip: &Trip) -> Result<String> {
        let vehicle = match &trip.vehicle_id {
            Some(id) => self.store.vehicle(id).await?,
            None => None,
        };
        vehicle
            .and_then(|v| v.registration_number)
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| TrackingError::NoVehicleIdentifier { trip_id: trip.id.clone() })
    }

    async fn fetch_sim(&self, trip: &Trip) -> Result<FetchedLocation> {
        let msisdn = self.resolve_msisdn(trip).await?;
        let token = self.credentials.get_token(TokenType::Authentication).await?;

        let started = Instant::now();
        let result = self.sim_throttle.run(self.sim.locate(&msisdn, &token)).await;
        let raw = self.observe(ProviderKind::Sim, trip, started, result)?;

        let fix = ProviderResponse::parse_sim(raw)?.into_fix()?;
        Ok(normalize(trip, fix, Utc::now()))
    }

    async fn fetch_gps(&self, trip: &Trip) -> Result<FetchedLocation> {
        let registration = self.resolve_registration(trip).await?;

        let started = Instant::now();
        let result = self.gps_throttle.run(self.gps.current_location(&registration)).await;
        let raw = self.observe(ProviderKind::Gps, trip, started, result)?;

        let fix = ProviderResponse::parse_gps(raw)?.into_fix()?;
        Ok(normalize(trip, fix, Utc::now()))
    }

    fn observe(
        &self,
        provider: ProviderKind,
        trip: &Trip,
        started: Instant,
        result: Result<Value>,
    ) -> Result<Value> {
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.record_provider_call(provider, latency_ms, result.is_ok());
        match &result {
            Ok(_) => debug!(
                provider = %provider.as_str(),
                trip_id = %trip.id,
                latency_ms = %latency_ms,
                "provider_request_ok"
            ),
            Err(e) => log_provider_failed(provider, trip, e),
        }
        result
    }
}

/// Build the canonical sample. A fix without a timestamp is stamped at receipt.
fn normalize(
    trip: &Trip,
    fix: crate::io::provider::LocationFix,
    received_at: DateTime<Utc>,
) -> FetchedLocation {
    let event_time = fix.timestamp.unwrap_or(received_at);
    let stale = (received_at - event_time).num_seconds() > STALE_AFTER_SECS;
    FetchedLocation {
        sample: NewSample {
            trip_id: trip.id.clone(),
            latitude: fix.point.latitude,
            longitude: fix.point.longitude,
            event_time,
            received_at,
            source: fix.source,
            address: fix.address,
            speed_kmh: fix.speed_kmh,
            heading_deg: fix.heading_deg,
            accuracy_meters: fix.accuracy_meters,
            raw_payload: fix.raw,
        },
        stale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Consent, Location, SampleSource, Vehicle};
    use crate::services::test_support::Rig;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn sim_trip() -> Trip {
        let mut trip = Trip::new("t-sim", TrackingType::Sim, Location::default(), Location::default());
        trip.driver_id = Some("d1".into());
        trip
    }

    fn allowed_consent(id: &str, msisdn: &str, minutes_ago: i64) -> Consent {
        Consent {
            id: id.into(),
            driver_id: "d1".into(),
            trip_id: None,
            msisdn: msisdn.into(),
            status: ConsentStatus::Allowed,
            updated_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_sim_uses_bound_consent_then_driver_fallback() {
        let rig = Rig::new();
        rig.store.put_consent(allowed_consent("c-old", "910000000001", 60));
        rig.store.put_consent(allowed_consent("c-new", "910000000002", 5));
        rig.sim.set_fix(12.97, 77.59, None);

        let mut trip = sim_trip();
        rig.telemetry.fetch_location(&trip).await.unwrap();
        assert_eq!(rig.sim.last_msisdn().as_deref(), Some("910000000002"));

        trip.consent_id = Some("c-old".into());
        rig.telemetry.fetch_location(&trip).await.unwrap();
        assert_eq!(rig.sim.last_msisdn().as_deref(), Some("910000000001"));
    }

    #[tokio::test]
    async fn test_sim_without_consent_fails() {
        let rig = Rig::new();
        let mut revoked = allowed_consent("c1", "910000000001", 1);
        revoked.status = ConsentStatus::Revoked;
        rig.store.put_consent(revoked);

        let err = rig.telemetry.fetch_location(&sim_trip()).await.unwrap_err();
        assert_eq!(err.code(), "no_consent");
        assert_eq!(rig.metrics.provider_calls_total(ProviderKind::Sim), 0);
    }

    #[tokio::test]
    async fn test_gps_requires_registration() {
        let rig = Rig::new();
        let mut trip = Trip::new("t-gps", TrackingType::Gps, Location::default(), Location::default());
        trip.vehicle_id = Some("v1".into());
        rig.store.put_vehicle(Vehicle { id: "v1".into(), registration_number: None });

        let err = rig.telemetry.fetch_location(&trip).await.unwrap_err();
        assert_eq!(err.code(), "no_vehicle_identifier");

        rig.store.put_vehicle(Vehicle { id: "v1".into(), registration_number: Some("KA01".into()) });
        rig.gps.set_payload(json!({"lat": 19.07, "lng": 72.87, "speed": 30}));
        let fetched = rig.telemetry.fetch_location(&trip).await.unwrap();
        assert_eq!(fetched.sample.source, SampleSource::Gps);
        assert_eq!(fetched.sample.speed_kmh, Some(30.0));
        assert!(!fetched.stale);
        assert_eq!(rig.metrics.provider_calls_total(ProviderKind::Gps), 1);
    }

    #[tokio::test]
    async fn test_untracked_trip_is_unsupported() {
        let rig = Rig::new();
        let trip = Trip::new("t0", TrackingType::None, Location::default(), Location::default());
        let err = rig.telemetry.fetch_location(&trip).await.unwrap_err();
        assert_eq!(err.code(), "unsupported_tracking_type");
    }

    #[tokio::test]
    async fn test_old_fix_is_flagged_stale() {
        let rig = Rig::new();
        rig.store.put_consent(allowed_consent("c1", "910000000001", 1));
        rig.sim.set_fix(12.97, 77.59, Some(Utc::now() - ChronoDuration::minutes(12)));

        let fetched = rig.telemetry.fetch_location(&sim_trip()).await.unwrap();
        assert!(fetched.stale);
        assert!(fetched.age_secs() >= 12 * 60);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_unavailable() {
        let limits = ProviderLimits {
            max_in_flight: 1,
            min_interval: Duration::ZERO,
            timeout: Duration::from_millis(20),
        };
        let throttle = ProviderThrottle::new(ProviderKind::Gps, limits);
        let err = throttle
            .run(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, TrackingError>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_throttle_spaces_call_starts() {
        let limits = ProviderLimits {
            max_in_flight: 4,
            min_interval: Duration::from_millis(30),
            timeout: Duration::from_secs(1),
        };
        let throttle = ProviderThrottle::new(ProviderKind::Sim, limits);
        let started = Instant::now();
        for _ in 0..3 {
            throttle.run(async { Ok::<_, TrackingError>(()) }).await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_missing_timestamp_uses_receipt_time() {
        let trip = sim_trip();
        let fix = ProviderResponse::parse_gps(json!({"lat": 1.0, "lng": 2.0}))
            .unwrap()
            .into_fix()
            .unwrap();
        let now = Utc::now();
        let fetched = normalize(&trip, fix, now);
        assert_eq!(fetched.sample.event_time, now);
        assert!(!fetched.stale);
    }
}
