//! Geofence-driven shipment status transitions
//!
//! Each shipment is evaluated against its own pickup/drop geometry and guarded
//! by its own status:
//! - mapped -> in_pickup on pickup-zone entry
//! - in_pickup -> in_transit on pickup-zone exit, once loading is completed
//! - in_transit -> out_for_delivery on drop-zone entry

use crate::domain::types::new_uuid_v7;
use crate::domain::{
    AlertSeverity, AlertType, GeoPoint, LoadingStatus, NewAlert, Shipment, ShipmentStatus,
    ShipmentStatusChange, Trip,
};
use crate::infra::error::{GeofenceSide, Result};
use crate::io::store::Store;
use crate::services::alerts::AlertManager;
use crate::services::geofence::{evaluate, GeofenceEvaluation};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub const SOURCE_GEOFENCE_SCAN: &str = "geofence_scan";
pub const SOURCE_TRIP_COMPLETION: &str = "trip_completion";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShipmentTransition {
    pub shipment_id: String,
    pub code: String,
    pub from: ShipmentStatus,
    pub to: ShipmentStatus,
    pub distance_meters: Option<f64>,
}

/// What a zone check decided for one shipment
struct ZoneDecision {
    next: ShipmentStatus,
    side: GeofenceSide,
    eval: GeofenceEvaluation,
    alert_type: AlertType,
}

pub struct ShipmentTracker {
    store: Arc<dyn Store>,
    alerts: Arc<AlertManager>,
}

impl ShipmentTracker {
    pub fn new(store: Arc<dyn Store>, alerts: Arc<AlertManager>) -> Self {
        Self { store, alerts }
    }

    fn decide(trip: &Trip, shipment: &Shipment, point: GeoPoint) -> Option<ZoneDecision> {
        let (target, side) = match shipment.status {
            ShipmentStatus::Mapped | ShipmentStatus::InPickup => (&shipment.pickup, GeofenceSide::Pickup),
            ShipmentStatus::InTransit => (&shipment.drop, GeofenceSide::Drop),
            _ => return None,
        };
        let eval = match evaluate(point, target, trip.tracking_type, side) {
            Ok(eval) => eval,
            Err(e) => {
                debug!(shipment_id = %shipment.id, reason = %e, "shipment_zone_check_skipped");
                return None;
            }
        };

        let (next, alert_type) = match shipment.status {
            ShipmentStatus::Mapped if eval.within_geofence => {
                (ShipmentStatus::InPickup, AlertType::GeofenceEntry)
            }
            ShipmentStatus::InPickup
                if !eval.within_geofence && shipment.loading_status == LoadingStatus::Completed =>
            {
                (ShipmentStatus::InTransit, AlertType::GeofenceExit)
            }
            ShipmentStatus::InTransit if eval.within_geofence => {
                (ShipmentStatus::OutForDelivery, AlertType::GeofenceEntry)
            }
            _ => return None,
        };
        Some(ZoneDecision { next, side, eval, alert_type })
    }

    /// Evaluate every shipment on the trip against `point` and apply any transitions.
    pub async fn evaluate_shipments(
        &self,
        trip: &Trip,
        point: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Vec<ShipmentTransition>> {
        let mut applied = Vec::new();
        for mut shipment in self.store.shipments_for_trip(&trip.id).await? {
            let Some(decision) = Self::decide(trip, &shipment, point) else {
                continue;
            };
            let from = shipment.status;
            let distance = decision.eval.distance_meters;
            self.apply(&mut shipment, decision.next, Some(distance), SOURCE_GEOFENCE_SCAN, now)
                .await?;

            let verb = if decision.alert_type == AlertType::GeofenceExit { "left" } else { "entered" };
            let alert = NewAlert::new(
                &trip.id,
                decision.alert_type,
                AlertSeverity::Low,
                &format!("Shipment {} {} {} zone", shipment.code, verb, decision.side.as_str()),
            )
            .with_description(format!(
                "{} -> {} at {:.0}m from the {} point (radius {:.0}m)",
                from,
                decision.next,
                distance,
                decision.side.as_str(),
                decision.eval.radius_meters
            ))
            .with_location(Some(point))
            .with_values(decision.eval.radius_meters, distance)
            .with_metadata(json!({
                "shipment_id": shipment.id,
                "shipment_code": shipment.code,
                "zone": decision.side.as_str(),
                "previous_status": from.as_str(),
                "new_status": decision.next.as_str(),
            }));
            self.alerts.create(alert, now).await?;

            applied.push(ShipmentTransition {
                shipment_id: shipment.id.clone(),
                code: shipment.code.clone(),
                from,
                to: decision.next,
                distance_meters: Some(distance),
            });
        }
        Ok(applied)
    }

    /// Move every non-terminal shipment on the trip to delivered
    pub async fn deliver_all(&self, trip: &Trip, now: DateTime<Utc>) -> Result<Vec<ShipmentTransition>> {
        let mut applied = Vec::new();
        for mut shipment in self.store.shipments_for_trip(&trip.id).await? {
            if shipment.status.is_terminal() {
                continue;
            }
            let from = shipment.status;
            self.apply(&mut shipment, ShipmentStatus::Delivered, None, SOURCE_TRIP_COMPLETION, now)
                .await?;
            applied.push(ShipmentTransition {
                shipment_id: shipment.id.clone(),
                code: shipment.code.clone(),
                from,
                to: ShipmentStatus::Delivered,
                distance_meters: None,
            });
        }
        Ok(applied)
    }

    async fn apply(
        &self,
        shipment: &mut Shipment,
        next: ShipmentStatus,
        distance_meters: Option<f64>,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let previous = shipment.status;
        shipment.status = next;
        shipment.updated_at = Some(now);
        self.store.update_shipment(shipment).await?;
        self.store
            .record_shipment_status(ShipmentStatusChange {
                id: new_uuid_v7(),
                shipment_id: shipment.id.clone(),
                trip_id: shipment.trip_id.clone(),
                previous_status: previous,
                new_status: next,
                distance_meters,
                source: source.to_string(),
                created_at: now,
            })
            .await?;
        info!(
            shipment_id = %shipment.id,
            trip_id = %shipment.trip_id,
            from = %previous,
            to = %next,
            source = %source,
            "shipment_status_changed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, TrackingType};
    use crate::infra::metrics::Metrics;
    use crate::io::store::MemoryStore;

    const PICKUP: GeoPoint = GeoPoint { latitude: 12.90, longitude: 77.50 };
    const DROP: GeoPoint = GeoPoint { latitude: 13.10, longitude: 77.70 };
    const NOWHERE: GeoPoint = GeoPoint { latitude: 12.00, longitude: 77.00 };

    fn setup() -> (ShipmentTracker, Arc<MemoryStore>, Trip) {
        let store = Arc::new(MemoryStore::new());
        let trip = Trip::new("t1", TrackingType::Gps, Location::default(), Location::default());
        store.put_trip(trip.clone());
        store.put_shipment(Shipment::new(
            "s1",
            &trip.id,
            Location::new("p", "Pickup", Some(PICKUP)),
            Location::new("d", "Drop", Some(DROP)),
        ));
        let alerts = Arc::new(AlertManager::new(store.clone(), Arc::new(Metrics::new())));
        (ShipmentTracker::new(store.clone(), alerts), store, trip)
    }

    async fn status(store: &MemoryStore, trip: &Trip) -> ShipmentStatus {
        store.shipments_for_trip(&trip.id).await.unwrap()[0].status
    }

    #[tokio::test]
    async fn test_full_zone_lifecycle() {
        let (tracker, store, trip) = setup();
        let now = Utc::now();

        assert!(tracker.evaluate_shipments(&trip, NOWHERE, now).await.unwrap().is_empty());

        let t = tracker.evaluate_shipments(&trip, PICKUP, now).await.unwrap();
        assert_eq!(t[0].to, ShipmentStatus::InPickup);

        // Exit before loading completes is ignored
        assert!(tracker.evaluate_shipments(&trip, NOWHERE, now).await.unwrap().is_empty());
        assert_eq!(status(&store, &trip).await, ShipmentStatus::InPickup);

        let mut shipment = store.shipments_for_trip(&trip.id).await.unwrap().remove(0);
        shipment.loading_status = LoadingStatus::Completed;
        store.update_shipment(&shipment).await.unwrap();

        let t = tracker.evaluate_shipments(&trip, NOWHERE, now).await.unwrap();
        assert_eq!(t[0].to, ShipmentStatus::InTransit);

        let t = tracker.evaluate_shipments(&trip, DROP, now).await.unwrap();
        assert_eq!(t[0].to, ShipmentStatus::OutForDelivery);

        let history = store.shipment_history("s1").await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|h| h.source == SOURCE_GEOFENCE_SCAN));
        assert!(history.iter().all(|h| h.distance_meters.is_some()));

        let alerts = store.alerts_for_trip(&trip.id, None).await.unwrap();
        let exits = alerts.iter().filter(|a| a.alert_type == AlertType::GeofenceExit).count();
        assert_eq!((alerts.len(), exits), (3, 1));
    }

    #[tokio::test]
    async fn test_deliver_all_skips_terminal() {
        let (tracker, store, trip) = setup();
        let mut cancelled = Shipment::new("s2", &trip.id, Location::default(), Location::default());
        cancelled.status = ShipmentStatus::Cancelled;
        store.put_shipment(cancelled);

        let delivered = tracker.deliver_all(&trip, Utc::now()).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].shipment_id, "s1");
        let history = store.shipment_history("s1").await.unwrap();
        assert_eq!(history[0].source, SOURCE_TRIP_COMPLETION);
        assert_eq!(history[0].new_status, ShipmentStatus::Delivered);
    }
}
