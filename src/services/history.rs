//! Append-only location history and the display-sampling read path

use crate::domain::{LocationSample, NewSample, TrackingSummary, TripId};
use crate::infra::error::Result;
use crate::infra::metrics::Metrics;
use crate::io::store::Store;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Maximum points returned for map rendering
pub const DISPLAY_POINT_BUDGET: usize = 500;

/// What the UI receives for a trip's track
#[derive(Debug, Clone, Serialize)]
pub struct TrackingHistory {
    pub trip_id: TripId,
    pub total_points: usize,
    pub points: Vec<LocationSample>,
    pub summary: Option<TrackingSummary>,
}

pub struct LocationHistory {
    store: Arc<dyn Store>,
    metrics: Arc<Metrics>,
}

impl LocationHistory {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Persist a sample; the store assigns the per-trip sequence number.
    pub async fn append(&self, sample: NewSample) -> Result<LocationSample> {
        let stored = self.store.append_sample(sample).await?;
        self.metrics.record_sample();
        debug!(
            trip_id = %stored.trip_id,
            seq = %stored.sequence_number,
            source = %stored.source,
            "location_recorded"
        );
        Ok(stored)
    }

    pub async fn get_tracking_history(&self, trip_id: &TripId) -> Result<TrackingHistory> {
        let samples = self.store.samples(trip_id).await?;
        let summary = self.store.tracking_summary(trip_id).await?;
        Ok(TrackingHistory {
            trip_id: trip_id.clone(),
            total_points: samples.len(),
            points: sample_for_display(&samples, DISPLAY_POINT_BUDGET),
            summary,
        })
    }
}

/// Evenly spaced subsequence of at most `max_points` samples, always keeping
/// the first and last. Never touches the stored history.
pub fn sample_for_display(samples: &[LocationSample], max_points: usize) -> Vec<LocationSample> {
    let max_points = max_points.max(2);
    if samples.len() <= max_points {
        return samples.to_vec();
    }

    let last = samples.len() - 1;
    let steps = max_points - 1;
    (0..max_points)
        .map(|i| {
            // Rounded index; strictly increasing because last > steps
            let idx = (i * last + steps / 2) / steps;
            samples[idx].clone()
        })
        .collect()
}
