//! Alert lifecycle - creation with dedup, auto-resolution, operator status updates
//!
//! Every status change, system or operator driven, writes an `AlertStatusChange`
//! row and recomputes the trip's `active_alert_count`.

use crate::domain::{
    Alert, AlertId, AlertStatus, AlertStatusChange, AlertType, NewAlert, TripId,
};
use crate::domain::types::new_uuid_v7;
use crate::infra::error::{Result, TrackingError};
use crate::infra::metrics::Metrics;
use crate::io::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const SOURCE_SYSTEM: &str = "system";
pub const SOURCE_OPERATOR: &str = "operator";

/// Operator context attached to a status update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUpdate {
    pub alert_id: AlertId,
    pub error: &'static str,
    pub message: String,
}

/// Partial-failure report for bulk status updates
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkUpdateResult {
    pub updated: Vec<AlertId>,
    pub failed: Vec<FailedUpdate>,
}

impl BulkUpdateResult {
    pub fn failed_ids(&self) -> Vec<&AlertId> {
        self.failed.iter().map(|f| &f.alert_id).collect()
    }
}

pub struct AlertManager {
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
}

impl AlertManager {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    pub async fn active_of_type(&self, trip_id: &TripId, alert_type: AlertType) -> Result<Vec<Alert>> {
        let mut alerts = self.store.alerts_for_trip(trip_id, Some(alert_type)).await?;
        alerts.retain(|a| a.status == AlertStatus::Active);
        Ok(alerts)
    }

    /// Insert a new active alert unconditionally
    pub async fn create(&self, new_alert: NewAlert, now: DateTime<Utc>) -> Result<Alert> {
        let alert = new_alert.into_alert(now);
        self.store.insert_alert(alert.clone()).await?;
        self.record_change(&alert, None, SOURCE_SYSTEM, None, None, now).await?;
        self.sync_active_count(&alert.trip_id).await?;
        self.metrics.record_alert_created();
        info!(
            alert_id = %alert.id,
            trip_id = %alert.trip_id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "alert_created"
        );
        Ok(alert)
    }

    /// Create unless an active alert of the same type already exists for the
    /// trip. An existing alert is left exactly as it is.
    pub async fn create_if_absent(
        &self,
        new_alert: NewAlert,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        if !self.active_of_type(&new_alert.trip_id, new_alert.alert_type).await?.is_empty() {
            return Ok(None);
        }
        self.create(new_alert, now).await.map(Some)
    }

    /// System-driven resolution of every active alert of `alert_type` on a trip
    pub async fn resolve_active(
        &self,
        trip_id: &TripId,
        alert_type: AlertType,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let active = self.active_of_type(trip_id, alert_type).await?;
        for mut alert in active.iter().cloned() {
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(now);
            self.store.update_alert(&alert).await?;
            self.record_change(
                &alert,
                Some(AlertStatus::Active),
                SOURCE_SYSTEM,
                None,
                Some(reason.to_string()),
                now,
            )
            .await?;
            self.metrics.record_alert_resolved();
            info!(alert_id = %alert.id, trip_id = %trip_id, alert_type = %alert_type, "alert_auto_resolved");
        }
        if !active.is_empty() {
            self.sync_active_count(trip_id).await?;
        }
        Ok(active.len())
    }

    /// Operator-driven status change
    pub async fn update_status(
        &self,
        alert_id: &AlertId,
        new_status: AlertStatus,
        update: &StatusUpdate,
    ) -> Result<Alert> {
        let mut alert = self
            .store
            .alert(alert_id)
            .await?
            .ok_or_else(|| TrackingError::not_found("alert", alert_id.as_str()))?;

        let previous = alert.status;
        if !previous.can_transition_to(new_status) {
            return Err(TrackingError::InvalidAlertTransition { from: previous, to: new_status });
        }

        let now = Utc::now();
        alert.status = new_status;
        if new_status.is_terminal() {
            alert.resolved_at = Some(now);
        }
        self.store.update_alert(&alert).await?;
        self.record_change(
            &alert,
            Some(previous),
            SOURCE_OPERATOR,
            update.user_id.clone(),
            update.notes.clone(),
            now,
        )
        .await?;
        if new_status == AlertStatus::Resolved {
            self.metrics.record_alert_resolved();
        }
        self.sync_active_count(&alert.trip_id).await?;

        info!(
            alert_id = %alert.id,
            previous = %previous,
            status = %new_status,
            user_id = %update.user_id.as_deref().unwrap_or("-"),
            "alert_status_updated"
        );
        Ok(alert)
    }

    /// Apply one status to many alerts; failures are collected, not fatal.
    pub async fn bulk_update_status(
        &self,
        alert_ids: &[AlertId],
        new_status: AlertStatus,
        update: &StatusUpdate,
    ) -> BulkUpdateResult {
        let mut result = BulkUpdateResult::default();
        for id in alert_ids {
            match self.update_status(id, new_status, update).await {
                Ok(alert) => result.updated.push(alert.id),
                Err(e) => {
                    warn!(alert_id = %id, error = %e, "alert_bulk_update_item_failed");
                    result.failed.push(FailedUpdate {
                        alert_id: id.clone(),
                        error: e.code(),
                        message: e.to_string(),
                    });
                }
            }
        }
        result
    }

    pub async fn history(&self, alert_id: &AlertId) -> Result<Vec<AlertStatusChange>> {
        Ok(self.store.alert_history(alert_id).await?)
    }

    async fn sync_active_count(&self, trip_id: &TripId) -> Result<()> {
        let count = self.store.count_active_alerts(trip_id).await?;
        match self.store.set_active_alert_count(trip_id, count).await {
            Ok(()) => Ok(()),
            // Alerts may reference trips this store does not hold
            Err(crate::infra::error::StoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_change(
        &self,
        alert: &Alert,
        previous: Option<AlertStatus>,
        source: &str,
        user_id: Option<String>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .record_alert_status(AlertStatusChange {
                id: new_uuid_v7(),
                alert_id: alert.id.clone(),
                trip_id: alert.trip_id.clone(),
                previous_status: previous,
                new_status: alert.status,
                user_id,
                notes,
                source: source.to_string(),
                created_at: now,
            })
            .await?;
        Ok(())
    }
}
