//! Shared identifiers and enums for the telemetry core

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Newtype wrapper for trip IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(pub String);

impl TripId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Newtype wrapper for alert IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub String);

impl AlertId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new time-sortable alert ID
    pub fn generate() -> Self {
        Self(new_uuid_v7())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Error returned when a wire string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a snake_case wire enum with `as_str`, `FromStr` and `Display`.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(
    /// Trip lifecycle status
    TripStatus, "trip status" {
        Created => "created",
        Ongoing => "ongoing",
        OnHold => "on_hold",
        Completed => "completed",
        Cancelled => "cancelled",
        Closed => "closed",
    }
);

wire_enum!(
    /// Which provider family locates the trip
    TrackingType, "tracking type" {
        Gps => "gps",
        Sim => "sim",
        None => "none",
    }
);

wire_enum!(
    /// Where a location sample came from
    SampleSource, "sample source" {
        Sim => "sim",
        Gps => "gps",
        Manual => "manual",
    }
);

wire_enum!(
    AlertType, "alert type" {
        RouteDeviation => "route_deviation",
        Stoppage => "stoppage",
        TrackingLost => "tracking_lost",
        DelayWarning => "delay_warning",
        IdleTime => "idle_time",
        ConsentRevoked => "consent_revoked",
        GeofenceEntry => "geofence_entry",
        GeofenceExit => "geofence_exit",
        SpeedExceeded => "speed_exceeded",
    }
);

wire_enum!(
    AlertSeverity, "alert severity" {
        Critical => "critical",
        High => "high",
        Medium => "medium",
        Low => "low",
    }
);

wire_enum!(
    AlertStatus, "alert status" {
        Active => "active",
        Acknowledged => "acknowledged",
        Resolved => "resolved",
        Dismissed => "dismissed",
    }
);

wire_enum!(
    /// Shipment status as far as the telemetry core drives it
    ShipmentStatus, "shipment status" {
        Created => "created",
        Mapped => "mapped",
        InPickup => "in_pickup",
        InTransit => "in_transit",
        OutForDelivery => "out_for_delivery",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
);

wire_enum!(
    /// Loading sub-status reported at the pickup point
    LoadingStatus, "loading status" {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
    }
);

wire_enum!(
    /// Provider credential flavours
    TokenType, "token type" {
        Authentication => "authentication",
        Access => "access",
    }
);

wire_enum!(
    /// Driver consent state for SIM tracking
    ConsentStatus, "consent status" {
        Allowed => "allowed",
        Revoked => "revoked",
        Pending => "pending",
    }
);

impl TripStatus {
    /// Closed and cancelled trips never move again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Closed | TripStatus::Cancelled)
    }
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::Dismissed)
    }

    /// Whether an operator or the system may move an alert from `self` to `next`
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (AlertStatus::Active, AlertStatus::Acknowledged)
                | (AlertStatus::Active, AlertStatus::Dismissed)
                | (AlertStatus::Active, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Resolved)
                | (AlertStatus::Acknowledged, AlertStatus::Dismissed)
        )
    }
}

impl ShipmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered | ShipmentStatus::Cancelled)
    }
}

/// Deserialize a coordinate that may arrive as a JSON number or a numeric string
pub(crate) fn deserialize_lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct LenientF64Visitor;

    impl<'de> Visitor<'de> for LenientF64Visitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_f64<E>(self, value: f64) -> Result<Option<f64>, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Option<f64>, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Option<f64>, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Option<f64>, E>
        where
            E: de::Error,
        {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed.parse::<f64>().map(Some).map_err(|_| E::custom(format!("not a number: {value}")))
        }

        fn visit_unit<E>(self) -> Result<Option<f64>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Option<f64>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(LenientF64Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_status_round_trips_through_wire_name() {
        assert_eq!("on_hold".parse::<TripStatus>().unwrap(), TripStatus::OnHold);
        assert_eq!(TripStatus::OnHold.as_str(), "on_hold");
        let err = "paused".parse::<TripStatus>().unwrap_err();
        assert_eq!(err.kind, "trip status");
    }

    #[test]
    fn test_alert_status_transitions() {
        assert!(AlertStatus::Active.can_transition_to(AlertStatus::Acknowledged));
        assert!(AlertStatus::Acknowledged.can_transition_to(AlertStatus::Resolved));
        assert!(!AlertStatus::Resolved.can_transition_to(AlertStatus::Active));
        assert!(!AlertStatus::Dismissed.can_transition_to(AlertStatus::Resolved));
        assert!(!AlertStatus::Acknowledged.can_transition_to(AlertStatus::Active));
    }

    #[test]
    fn test_alert_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&AlertType::DelayWarning).unwrap();
        assert_eq!(json, "\"delay_warning\"");
    }

    #[test]
    fn test_lenient_f64() {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(default, deserialize_with = "deserialize_lenient_f64")]
            v: Option<f64>,
        }

        let p: Probe = serde_json::from_str(r#"{"v":"12.5"}"#).unwrap();
        assert_eq!(p.v, Some(12.5));
        let p: Probe = serde_json::from_str(r#"{"v":7}"#).unwrap();
        assert_eq!(p.v, Some(7.0));
        let p: Probe = serde_json::from_str(r#"{"v":null}"#).unwrap();
        assert_eq!(p.v, None);
        let p: Probe = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(p.v, None);
        assert!(serde_json::from_str::<Probe>(r#"{"v":"abc"}"#).is_err());
    }
}
