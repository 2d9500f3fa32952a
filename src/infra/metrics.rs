//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for every counter update. `report()` swaps the periodic
//! counters to zero; monotonic totals are only ever loaded.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only and must not be used for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Provider call latency bucket boundaries (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
pub const LATENCY_BUCKET_BOUNDS_MS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
pub const LATENCY_NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    LATENCY_BUCKET_BOUNDS_MS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; LATENCY_NUM_BUCKETS]) -> [u64; LATENCY_NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets.
/// Returns the upper bound of the bucket containing the percentile.
fn percentile_from_buckets(buckets: &[u64; LATENCY_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return LATENCY_BUCKET_BOUNDS_MS.get(i).copied().unwrap_or(LATENCY_BUCKET_BOUNDS_MS[9] * 2);
        }
    }
    LATENCY_BUCKET_BOUNDS_MS[9] * 2
}

/// The four scan entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    LocationRefresh,
    Geofence,
    Delay,
    AutoStart,
}

impl ScanKind {
    pub const ALL: [ScanKind; 4] =
        [ScanKind::LocationRefresh, ScanKind::Geofence, ScanKind::Delay, ScanKind::AutoStart];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::LocationRefresh => "location_refresh",
            ScanKind::Geofence => "geofence",
            ScanKind::Delay => "delay",
            ScanKind::AutoStart => "auto_start",
        }
    }

    fn index(&self) -> usize {
        match self {
            ScanKind::LocationRefresh => 0,
            ScanKind::Geofence => 1,
            ScanKind::Delay => 2,
            ScanKind::AutoStart => 3,
        }
    }
}

/// Provider families, for per-provider counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Sim,
    Gps,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Sim => "sim",
            ProviderKind::Gps => "gps",
        }
    }

    fn index(&self) -> usize {
        match self {
            ProviderKind::Sim => 0,
            ProviderKind::Gps => 1,
        }
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Scan invocations per kind (monotonic)
    scans_total: [AtomicU64; 4],
    /// Trips processed by scans (monotonic)
    trips_processed_total: AtomicU64,
    /// Trips whose scan step failed (monotonic)
    trips_failed_total: AtomicU64,
    /// Provider calls per provider (monotonic)
    provider_calls_total: [AtomicU64; 2],
    /// Provider failures per provider (monotonic)
    provider_failures_total: [AtomicU64; 2],
    /// Provider latency histogram (reset on report)
    provider_latency_buckets: [AtomicU64; LATENCY_NUM_BUCKETS],
    /// Max provider latency (reset on report)
    provider_latency_max_ms: AtomicU64,
    /// Sum of provider latencies (monotonic)
    provider_latency_sum_ms: AtomicU64,
    /// Samples appended to history (monotonic)
    samples_recorded_total: AtomicU64,
    /// Samples since last report (reset on report)
    samples_since_report: AtomicU64,
    alerts_created_total: AtomicU64,
    alerts_resolved_total: AtomicU64,
    credential_refreshes_total: AtomicU64,
    trip_transitions_total: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_total: std::array::from_fn(|_| AtomicU64::new(0)),
            trips_processed_total: AtomicU64::new(0),
            trips_failed_total: AtomicU64::new(0),
            provider_calls_total: std::array::from_fn(|_| AtomicU64::new(0)),
            provider_failures_total: std::array::from_fn(|_| AtomicU64::new(0)),
            provider_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            provider_latency_max_ms: AtomicU64::new(0),
            provider_latency_sum_ms: AtomicU64::new(0),
            samples_recorded_total: AtomicU64::new(0),
            samples_since_report: AtomicU64::new(0),
            alerts_created_total: AtomicU64::new(0),
            alerts_resolved_total: AtomicU64::new(0),
            credential_refreshes_total: AtomicU64::new(0),
            trip_transitions_total: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_scan(&self, kind: ScanKind, processed: u64, failed: u64) {
        self.scans_total[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.trips_processed_total.fetch_add(processed, Ordering::Relaxed);
        self.trips_failed_total.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record one provider call and its outcome
    #[inline]
    pub fn record_provider_call(&self, provider: ProviderKind, latency_ms: u64, ok: bool) {
        self.provider_calls_total[provider.index()].fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.provider_failures_total[provider.index()].fetch_add(1, Ordering::Relaxed);
        }
        self.provider_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.provider_latency_max_ms, latency_ms);
        self.provider_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sample(&self) {
        self.samples_recorded_total.fetch_add(1, Ordering::Relaxed);
        self.samples_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_created(&self) {
        self.alerts_created_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_alert_resolved(&self) {
        self.alerts_resolved_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_credential_refresh(&self) {
        self.credential_refreshes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trip_transition(&self) {
        self.trip_transitions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scans_total(&self, kind: ScanKind) -> u64 {
        self.scans_total[kind.index()].load(Ordering::Relaxed)
    }

    pub fn provider_calls_total(&self, provider: ProviderKind) -> u64 {
        self.provider_calls_total[provider.index()].load(Ordering::Relaxed)
    }

    pub fn provider_failures_total(&self, provider: ProviderKind) -> u64 {
        self.provider_failures_total[provider.index()].load(Ordering::Relaxed)
    }

    pub fn samples_recorded_total(&self) -> u64 {
        self.samples_recorded_total.load(Ordering::Relaxed)
    }

    pub fn alerts_created_total(&self) -> u64 {
        self.alerts_created_total.load(Ordering::Relaxed)
    }

    pub fn alerts_resolved_total(&self) -> u64 {
        self.alerts_resolved_total.load(Ordering::Relaxed)
    }

    pub fn credential_refreshes_total(&self) -> u64 {
        self.credential_refreshes_total.load(Ordering::Relaxed)
    }

    pub fn trip_transitions_total(&self) -> u64 {
        self.trip_transitions_total.load(Ordering::Relaxed)
    }

    pub fn trips_processed_total(&self) -> u64 {
        self.trips_processed_total.load(Ordering::Relaxed)
    }

    pub fn trips_failed_total(&self) -> u64 {
        self.trips_failed_total.load(Ordering::Relaxed)
    }

    pub fn provider_latency_sum_ms(&self) -> u64 {
        self.provider_latency_sum_ms.load(Ordering::Relaxed)
    }

    /// Histogram snapshot without resetting (for Prometheus scrapes)
    pub fn provider_latency_buckets(&self) -> [u64; LATENCY_NUM_BUCKETS] {
        load_buckets(&self.provider_latency_buckets)
    }

    /// Take a periodic snapshot. Resets the periodic counters only.
    pub fn report(&self) -> MetricsSummary {
        let samples_count = self.samples_since_report.swap(0, Ordering::Relaxed);
        let latency_buckets: [u64; LATENCY_NUM_BUCKETS] =
            std::array::from_fn(|i| self.provider_latency_buckets[i].swap(0, Ordering::Relaxed));
        let latency_max_ms = self.provider_latency_max_ms.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let samples_per_min = if elapsed.as_secs_f64() > 0.0 {
            samples_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            trips_processed_total: self.trips_processed_total(),
            trips_failed_total: self.trips_failed_total(),
            sim_calls_total: self.provider_calls_total(ProviderKind::Sim),
            sim_failures_total: self.provider_failures_total(ProviderKind::Sim),
            gps_calls_total: self.provider_calls_total(ProviderKind::Gps),
            gps_failures_total: self.provider_failures_total(ProviderKind::Gps),
            provider_latency_p50_ms: percentile_from_buckets(&latency_buckets, 0.50),
            provider_latency_p99_ms: percentile_from_buckets(&latency_buckets, 0.99),
            provider_latency_max_ms: latency_max_ms,
            samples_recorded_total: self.samples_recorded_total(),
            samples_per_min,
            alerts_created_total: self.alerts_created_total(),
            alerts_resolved_total: self.alerts_resolved_total(),
            credential_refreshes_total: self.credential_refreshes_total(),
        }
    }
}

/// Snapshot produced by `Metrics::report`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub trips_processed_total: u64,
    pub trips_failed_total: u64,
    pub sim_calls_total: u64,
    pub sim_failures_total: u64,
    pub gps_calls_total: u64,
    pub gps_failures_total: u64,
    pub provider_latency_p50_ms: u64,
    pub provider_latency_p99_ms: u64,
    pub provider_latency_max_ms: u64,
    pub samples_recorded_total: u64,
    pub samples_per_min: f64,
    pub alerts_created_total: u64,
    pub alerts_resolved_total: u64,
    pub credential_refreshes_total: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            trips_processed = %self.trips_processed_total,
            trips_failed = %self.trips_failed_total,
            sim_calls = %self.sim_calls_total,
            sim_failures = %self.sim_failures_total,
            gps_calls = %self.gps_calls_total,
            gps_failures = %self.gps_failures_total,
            provider_p50_ms = %self.provider_latency_p50_ms,
            provider_p99_ms = %self.provider_latency_p99_ms,
            provider_max_ms = %self.provider_latency_max_ms,
            samples_total = %self.samples_recorded_total,
            samples_per_min = format!("{:.1}", self.samples_per_min),
            alerts_created = %self.alerts_created_total,
            alerts_resolved = %self.alerts_resolved_total,
            token_refreshes = %self.credential_refreshes_total,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(10), 0);
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(51), 1);
        assert_eq!(bucket_index(30_000), 10);
    }

    #[test]
    fn test_record_provider_call() {
        let metrics = Metrics::new();
        metrics.record_provider_call(ProviderKind::Sim, 120, true);
        metrics.record_provider_call(ProviderKind::Sim, 90, false);
        metrics.record_provider_call(ProviderKind::Gps, 40, true);

        assert_eq!(metrics.provider_calls_total(ProviderKind::Sim), 2);
        assert_eq!(metrics.provider_failures_total(ProviderKind::Sim), 1);
        assert_eq!(metrics.provider_calls_total(ProviderKind::Gps), 1);
        assert_eq!(metrics.provider_failures_total(ProviderKind::Gps), 0);
        assert_eq!(metrics.provider_latency_buckets().iter().sum::<u64>(), 3);
    }

    #[test]
    fn test_report_resets_periodic_counters_only() {
        let metrics = Metrics::new();
        metrics.record_sample();
        metrics.record_sample();
        metrics.record_provider_call(ProviderKind::Gps, 300, true);
        metrics.record_scan(ScanKind::Delay, 4, 1);

        let summary = metrics.report();
        assert_eq!(summary.samples_recorded_total, 2);
        assert_eq!(summary.provider_latency_max_ms, 300);
        assert_eq!(summary.provider_latency_p99_ms, 400);
        assert_eq!(summary.trips_processed_total, 4);
        assert_eq!(summary.trips_failed_total, 1);

        let second = metrics.report();
        assert_eq!(second.samples_recorded_total, 2);
        assert_eq!(second.provider_latency_max_ms, 0);
        assert_eq!(second.provider_latency_p99_ms, 0);
        assert_eq!(metrics.scans_total(ScanKind::Delay), 1);
    }
}
