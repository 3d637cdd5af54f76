//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::SafetyState;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;
const NUM_STATES: usize = SafetyState::ALL.len();

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Cycles processed (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Sum of cycle latencies in microseconds (reset on report)
    cycle_latency_sum_us: AtomicU64,
    /// Max cycle latency in microseconds (reset on report)
    cycle_latency_max_us: AtomicU64,
    /// Cycle latency histogram buckets (reset on report)
    cycle_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Cumulative cycle latency histogram for Prometheus (never reset)
    cycle_latency_buckets_total: [AtomicU64; NUM_BUCKETS],
    cycle_latency_sum_total_us: AtomicU64,
    /// Observations that reached the filter stage (monotonic)
    observations_accepted: AtomicU64,
    /// Malformed observations dropped (monotonic)
    observations_rejected: AtomicU64,
    /// Observations for ignored entities (monotonic)
    observations_ignored: AtomicU64,
    /// Anchors frozen (monotonic)
    anchors_set: AtomicU64,
    /// Transitions into Breach (monotonic)
    breaches_total: AtomicU64,
    /// Transitions into ForecastBreach (monotonic)
    forecast_breaches_total: AtomicU64,
    /// Transitions into Stale (monotonic)
    stale_total: AtomicU64,
    /// Entities per safety state after the last cycle (gauge)
    entities_by_state: [AtomicU64; NUM_STATES],
    /// Batches received from ingress (monotonic)
    batches_received: AtomicU64,
    /// Batches replaced by a newer one before a cycle consumed them (monotonic)
    batches_superseded: AtomicU64,
    /// Batches dropped because the cycle runner's queue was full (monotonic)
    batches_dropped: AtomicU64,
    /// Ingress payloads that could not be decoded at all (monotonic)
    payloads_undecodable: AtomicU64,
    /// Egress messages dropped due to channel full (monotonic)
    egress_dropped: AtomicU64,
    /// Last report time for rate calculation
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            cycle_latency_sum_us: AtomicU64::new(0),
            cycle_latency_max_us: AtomicU64::new(0),
            cycle_latency_buckets: Default::default(),
            cycle_latency_buckets_total: Default::default(),
            cycle_latency_sum_total_us: AtomicU64::new(0),
            observations_accepted: AtomicU64::new(0),
            observations_rejected: AtomicU64::new(0),
            observations_ignored: AtomicU64::new(0),
            anchors_set: AtomicU64::new(0),
            breaches_total: AtomicU64::new(0),
            forecast_breaches_total: AtomicU64::new(0),
            stale_total: AtomicU64::new(0),
            entities_by_state: Default::default(),
            batches_received: AtomicU64::new(0),
            batches_superseded: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            payloads_undecodable: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record a processed cycle (lock-free)
    #[inline]
    pub fn record_cycle(&self, latency_us: u64, accepted: usize, rejected: usize, ignored: usize) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.cycle_latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.cycle_latency_max_us, latency_us);

        let bucket = bucket_index(latency_us);
        self.cycle_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.cycle_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);

        self.observations_accepted.fetch_add(accepted as u64, Ordering::Relaxed);
        self.observations_rejected.fetch_add(rejected as u64, Ordering::Relaxed);
        self.observations_ignored.fetch_add(ignored as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_anchor_set(&self) {
        self.anchors_set.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transition into one of the alerting states
    #[inline]
    pub fn record_transition(&self, to: SafetyState) {
        match to {
            SafetyState::Breach => self.breaches_total.fetch_add(1, Ordering::Relaxed),
            SafetyState::ForecastBreach => {
                self.forecast_breaches_total.fetch_add(1, Ordering::Relaxed)
            }
            SafetyState::Stale => self.stale_total.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
    }

    /// Replace the per-state entity gauges
    pub fn set_state_counts(&self, counts: &[u64; NUM_STATES]) {
        for (gauge, count) in self.entities_by_state.iter().zip(counts) {
            gauge.store(*count, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_batch_received(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_superseded(&self) {
        self.batches_superseded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_payload_undecodable(&self) {
        self.payloads_undecodable.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        self.egress_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn cycles_total(&self) -> u64 {
        self.cycles_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn observations_accepted(&self) -> u64 {
        self.observations_accepted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn observations_rejected(&self) -> u64 {
        self.observations_rejected.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn observations_ignored(&self) -> u64 {
        self.observations_ignored.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn anchors_set(&self) -> u64 {
        self.anchors_set.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn breaches_total(&self) -> u64 {
        self.breaches_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn forecast_breaches_total(&self) -> u64 {
        self.forecast_breaches_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn stale_total(&self) -> u64 {
        self.stale_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn entities_in(&self, state: SafetyState) -> u64 {
        self.entities_by_state[state.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn batches_received(&self) -> u64 {
        self.batches_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn batches_superseded(&self) -> u64 {
        self.batches_superseded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn batches_dropped(&self) -> u64 {
        self.batches_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn payloads_undecodable(&self) -> u64 {
        self.payloads_undecodable.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn egress_dropped(&self) -> u64 {
        self.egress_dropped.load(Ordering::Relaxed)
    }

    /// Cumulative latency histogram and sum, for Prometheus exposition
    pub fn cycle_latency_histogram(&self) -> ([u64; NUM_BUCKETS], u64) {
        (
            load_buckets(&self.cycle_latency_buckets_total),
            self.cycle_latency_sum_total_us.load(Ordering::Relaxed),
        )
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self, tracked_entities: usize) -> MetricsSummary {
        let cycles_count = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.cycle_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.cycle_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.cycle_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let cycles_per_min = if elapsed.as_secs_f64() > 0.0 {
            cycles_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if cycles_count > 0 { latency_sum / cycles_count } else { 0 };

        let mut entities_by_state = [0u64; NUM_STATES];
        for (i, gauge) in self.entities_by_state.iter().enumerate() {
            entities_by_state[i] = gauge.load(Ordering::Relaxed);
        }

        MetricsSummary {
            cycles_total: self.cycles_total(),
            cycles_per_min,
            avg_cycle_latency_us: avg_latency,
            max_cycle_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            tracked_entities,
            entities_by_state,
            observations_accepted: self.observations_accepted(),
            observations_rejected: self.observations_rejected(),
            observations_ignored: self.observations_ignored(),
            anchors_set: self.anchors_set(),
            breaches_total: self.breaches_total(),
            forecast_breaches_total: self.forecast_breaches_total(),
            stale_total: self.stale_total(),
            batches_received: self.batches_received(),
            batches_superseded: self.batches_superseded(),
            batches_dropped: self.batches_dropped(),
            payloads_undecodable: self.payloads_undecodable(),
            egress_dropped: self.egress_dropped(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub cycles_total: u64,
    pub cycles_per_min: f64,
    pub avg_cycle_latency_us: u64,
    pub max_cycle_latency_us: u64,
    /// Cycle latency histogram buckets since the last report
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub tracked_entities: usize,
    /// Indexed by `SafetyState::index`
    pub entities_by_state: [u64; NUM_STATES],
    pub observations_accepted: u64,
    pub observations_rejected: u64,
    pub observations_ignored: u64,
    pub anchors_set: u64,
    pub breaches_total: u64,
    pub forecast_breaches_total: u64,
    pub stale_total: u64,
    pub batches_received: u64,
    pub batches_superseded: u64,
    pub batches_dropped: u64,
    pub payloads_undecodable: u64,
    pub egress_dropped: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        let state = |s: SafetyState| self.entities_by_state[s.index()];
        info!(
            cycles_total = %self.cycles_total,
            cycles_per_min = format!("{:.1}", self.cycles_per_min),
            avg_latency_us = %self.avg_cycle_latency_us,
            max_latency_us = %self.max_cycle_latency_us,
            p99_us = %self.lat_p99_us,
            tracked = %self.tracked_entities,
            safe = %state(SafetyState::Safe),
            forecast_breach = %state(SafetyState::ForecastBreach),
            breach = %state(SafetyState::Breach),
            stale = %state(SafetyState::Stale),
            accepted = %self.observations_accepted,
            rejected = %self.observations_rejected,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.cycles_total(), 0);
        assert_eq!(metrics.anchors_set(), 0);
        assert_eq!(metrics.entities_in(SafetyState::Safe), 0);
    }

    #[test]
    fn test_record_cycle() {
        let metrics = Metrics::new();

        metrics.record_cycle(100, 3, 1, 0);
        assert_eq!(metrics.cycles_total(), 1);
        assert_eq!(metrics.cycle_latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_cycle(200, 2, 0, 1);
        assert_eq!(metrics.cycles_total(), 2);
        assert_eq!(metrics.observations_accepted(), 5);
        assert_eq!(metrics.observations_rejected(), 1);
        assert_eq!(metrics.observations_ignored(), 1);
    }

    #[test]
    fn test_transitions_counted_by_target() {
        let metrics = Metrics::new();
        metrics.record_transition(SafetyState::Breach);
        metrics.record_transition(SafetyState::ForecastBreach);
        metrics.record_transition(SafetyState::ForecastBreach);
        metrics.record_transition(SafetyState::Stale);
        metrics.record_transition(SafetyState::Safe);

        assert_eq!(metrics.breaches_total(), 1);
        assert_eq!(metrics.forecast_breaches_total(), 2);
        assert_eq!(metrics.stale_total(), 1);
    }

    #[test]
    fn test_state_gauges_replaced() {
        let metrics = Metrics::new();
        metrics.set_state_counts(&[0, 1, 4, 0, 2, 0]);
        assert_eq!(metrics.entities_in(SafetyState::Safe), 4);
        assert_eq!(metrics.entities_in(SafetyState::Breach), 2);

        metrics.set_state_counts(&[0, 0, 5, 0, 0, 1]);
        assert_eq!(metrics.entities_in(SafetyState::Breach), 0);
        assert_eq!(metrics.entities_in(SafetyState::Stale), 1);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_cycle(100, 1, 0, 0);
        metrics.record_cycle(200, 1, 0, 0);
        metrics.record_cycle(300, 1, 0, 0);
        metrics.record_anchor_set();

        let summary = metrics.report(5);

        assert_eq!(summary.cycles_total, 3);
        assert_eq!(summary.avg_cycle_latency_us, 200); // (100+200+300)/3
        assert_eq!(summary.max_cycle_latency_us, 300);
        assert_eq!(summary.tracked_entities, 5);
        assert_eq!(summary.anchors_set, 1);
        assert_eq!(summary.observations_accepted, 3);

        // Periodic counters should be reset
        assert_eq!(metrics.cycles_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.cycle_latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.cycle_latency_max_us.load(Ordering::Relaxed), 0);

        // Cumulative histogram is kept for Prometheus
        let (buckets, sum) = metrics.cycle_latency_histogram();
        assert_eq!(buckets.iter().sum::<u64>(), 3);
        assert_eq!(sum, 600);
    }

    #[test]
    fn test_report_empty() {
        let metrics = Metrics::new();
        let summary = metrics.report(0);

        assert_eq!(summary.cycles_total, 0);
        assert_eq!(summary.avg_cycle_latency_us, 0);
        assert_eq!(summary.max_cycle_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_cycle(i as u64, 1, 0, 0);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.cycles_total(), 10_000);
        assert_eq!(metrics.observations_accepted(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // All at 150µs (bucket 1, ≤200)
        for _ in 0..100 {
            metrics.record_cycle(150, 0, 0, 0);
        }

        let summary = metrics.report(0);
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
