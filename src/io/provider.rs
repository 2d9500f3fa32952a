//! Location provider contracts and response normalization
//!
//! Both providers return loosely typed payloads. They are parsed into
//! `ProviderResponse::Sim` / `ProviderResponse::Gps` here and normalized into one
//! `LocationFix`; nothing downstream sees the raw key names.

use crate::domain::types::deserialize_lenient_f64;
use crate::domain::{GeoPoint, SampleSource};
use crate::infra::error::{Result, TrackingError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

/// A freshly issued provider token
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

/// SIM (cell-network) location provider
#[async_trait]
pub trait SimApi: Send + Sync {
    /// Basic-auth login exchange issuing the "authentication" token
    async fn login(&self) -> Result<IssuedToken>;
    /// OAuth client-credentials exchange issuing the "access" token
    async fn client_credentials(&self) -> Result<IssuedToken>;
    /// Last known location for a subscriber
    async fn locate(&self, msisdn: &str, auth_token: &str) -> Result<Value>;
}

/// GPS device location provider (static token, no refresh path)
#[async_trait]
pub trait GpsApi: Send + Sync {
    async fn current_location(&self, registration_number: &str) -> Result<Value>;
}

/// Provider-neutral position fix
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub point: GeoPoint,
    /// Provider-reported fix time; `None` when the payload carries none
    pub timestamp: Option<DateTime<Utc>>,
    pub address: Option<String>,
    pub speed_kmh: Option<f64>,
    pub heading_deg: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub source: SampleSource,
    pub raw: Value,
}

/// SIM payload: `{ data: { location: { latitude, longitude, timestamp, detailedAddress } } }`
#[derive(Debug, Clone, Deserialize)]
pub struct SimFix {
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default, rename = "detailedAddress", alias = "address")]
    pub detailed_address: Option<String>,
}

/// GPS payload; the provider uses either `lat`/`lng` or `latitude`/`longitude`
#[derive(Debug, Clone, Deserialize)]
pub struct GpsFix {
    #[serde(default, alias = "lat", deserialize_with = "deserialize_lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, alias = "lng", alias = "lon", deserialize_with = "deserialize_lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default, alias = "time", alias = "gps_time", alias = "timestamp")]
    pub event_time: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub speed: Option<f64>,
    #[serde(default, alias = "course", deserialize_with = "deserialize_lenient_f64")]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_lenient_f64")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Tagged union over provider payload shapes
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    Sim { fix: SimFix, raw: Value },
    Gps { fix: GpsFix, raw: Value },
}

impl ProviderResponse {
    pub fn parse_sim(raw: Value) -> Result<Self> {
        let body = raw
            .pointer("/data/location")
            .or_else(|| raw.get("location"))
            .or_else(|| raw.get("data"))
            .cloned()
            .ok_or_else(|| TrackingError::MalformedResponse("SIM payload has no location".into()))?;
        let fix: SimFix = serde_json::from_value(body)
            .map_err(|e| TrackingError::MalformedResponse(format!("SIM location: {e}")))?;
        Ok(ProviderResponse::Sim { fix, raw })
    }

    pub fn parse_gps(raw: Value) -> Result<Self> {
        let body = match raw.get("data") {
            Some(Value::Array(items)) => items.first().cloned(),
            Some(obj @ Value::Object(_)) => Some(obj.clone()),
            _ => Some(raw.clone()),
        }
        .ok_or_else(|| TrackingError::MalformedResponse("GPS payload has empty data".into()))?;
        let fix: GpsFix = serde_json::from_value(body)
            .map_err(|e| TrackingError::MalformedResponse(format!("GPS location: {e}")))?;
        Ok(ProviderResponse::Gps { fix, raw })
    }

    /// Normalize into a canonical fix, rejecting payloads without usable coordinates
    pub fn into_fix(self) -> Result<LocationFix> {
        let fix = match self {
            ProviderResponse::Sim { fix, raw } => LocationFix {
                point: coordinates(fix.latitude, fix.longitude, "SIM")?,
                timestamp: fix.timestamp.as_ref().and_then(parse_provider_time),
                address: fix.detailed_address,
                speed_kmh: None,
                heading_deg: None,
                accuracy_meters: None,
                source: SampleSource::Sim,
                raw,
            },
            ProviderResponse::Gps { fix, raw } => LocationFix {
                point: coordinates(fix.latitude, fix.longitude, "GPS")?,
                timestamp: fix.event_time.as_ref().and_then(parse_provider_time),
                address: fix.address,
                speed_kmh: fix.speed,
                heading_deg: fix.heading,
                accuracy_meters: fix.accuracy,
                source: SampleSource::Gps,
                raw,
            },
        };
        Ok(fix)
    }
}

fn coordinates(lat: Option<f64>, lng: Option<f64>, provider: &str) -> Result<GeoPoint> {
    match (lat, lng) {
        (Some(lat), Some(lng))
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
        {
            Ok(GeoPoint::new(lat, lng))
        }
        (Some(lat), Some(lng)) => Err(TrackingError::MalformedResponse(format!(
            "{provider} coordinates out of range: {lat},{lng}"
        ))),
        _ => Err(TrackingError::MalformedResponse(format!("{provider} payload missing coordinates"))),
    }
}

/// Parse a provider timestamp: RFC 3339, naive `YYYY-MM-DD HH:MM:SS` (UTC),
/// epoch milliseconds or epoch seconds.
pub fn parse_provider_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d-%m-%Y %H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            s.parse::<i64>().ok().and_then(epoch_to_datetime)
        }
        Value::Number(n) => n.as_i64().and_then(epoch_to_datetime),
        _ => None,
    }
}

/// Values above 10^11 are treated as milliseconds
fn epoch_to_datetime(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch.abs() >= 100_000_000_000 {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_sim_nested_shape() {
        let raw = json!({
            "status": "success",
            "data": {
                "msisdn": "919800000001",
                "location": {
                    "latitude": "12.9716",
                    "longitude": "77.5946",
                    "timestamp": "2024-05-01 10:15:00",
                    "detailedAddress": "MG Road, Bengaluru"
                }
            }
        });
        let fix = ProviderResponse::parse_sim(raw.clone()).unwrap().into_fix().unwrap();
        assert_eq!(fix.point, GeoPoint::new(12.9716, 77.5946));
        assert_eq!(fix.address.as_deref(), Some("MG Road, Bengaluru"));
        assert_eq!(fix.source, SampleSource::Sim);
        assert_eq!(fix.timestamp.unwrap().to_rfc3339(), "2024-05-01T10:15:00+00:00");
        assert_eq!(fix.raw, raw);
    }

    #[test]
    fn test_parse_gps_accepts_both_key_variants() {
        let short = json!({"data": {"lat": 19.07, "lng": 72.87, "speed": 42.5}});
        let long = json!({"latitude": "19.07", "longitude": "72.87", "heading": 90});

        let a = ProviderResponse::parse_gps(short).unwrap().into_fix().unwrap();
        let b = ProviderResponse::parse_gps(long).unwrap().into_fix().unwrap();
        assert_eq!(a.point, b.point);
        assert_eq!(a.speed_kmh, Some(42.5));
        assert_eq!(b.heading_deg, Some(90.0));
        assert_eq!(a.timestamp, None);
    }

    #[test]
    fn test_parse_gps_takes_first_of_array() {
        let raw = json!({"data": [{"lat": 1.5, "lng": 2.5, "time": 1714558500000i64}]});
        let fix = ProviderResponse::parse_gps(raw).unwrap().into_fix().unwrap();
        assert_eq!(fix.point, GeoPoint::new(1.5, 2.5));
        assert_eq!(fix.timestamp.unwrap().timestamp(), 1714558500);
    }

    #[test]
    fn test_missing_coordinates_is_malformed() {
        let raw = json!({"data": {"location": {"latitude": "12.9"}}});
        let err = ProviderResponse::parse_sim(raw).unwrap().into_fix().unwrap_err();
        assert_eq!(err.code(), "malformed_response");

        let err = ProviderResponse::parse_gps(json!({"lat": 95.0, "lng": 10.0}))
            .unwrap()
            .into_fix()
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_parse_provider_time_variants() {
        assert!(parse_provider_time(&json!("2024-05-01T10:15:00Z")).is_some());
        assert_eq!(parse_provider_time(&json!(1714558500)).unwrap().timestamp(), 1714558500);
        assert_eq!(parse_provider_time(&json!("1714558500000")).unwrap().timestamp(), 1714558500);
        assert!(parse_provider_time(&json!("yesterday")).is_none());
        assert!(parse_provider_time(&Value::Null).is_none());
    }
}
