//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to hand cycle results to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::types::{Activity, GeoPoint, SafetyState, TrackerSnapshot};
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_NUM_BUCKETS};
use crate::services::engine::{CycleReport, StateTransition};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Per-entity result of one cycle
    Snapshot(SnapshotPayload),
    /// Transition into or out of an alerting state
    Alert(AlertPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for per-entity snapshots
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotPayload {
    /// Site identifier
    pub site: String,
    /// Cycle number
    pub cycle: u64,
    /// Timestamp of the cycle (epoch ms)
    pub ts: i64,
    pub entity: String,
    pub state: SafetyState,
    /// Filtered distance from anchor (m)
    pub dist_m: f64,
    /// One-tick forecast distance (m)
    pub forecast_m: f64,
    pub trend: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
}

impl SnapshotPayload {
    pub fn from_snapshot(snapshot: &TrackerSnapshot, site: String, cycle: u64, ts: i64) -> Self {
        Self {
            site,
            cycle,
            ts,
            entity: snapshot.entity_id.to_string(),
            state: snapshot.safety_state,
            dist_m: snapshot.filtered_distance_m,
            forecast_m: snapshot.forecast_distance_m,
            trend: snapshot.trend_history.clone(),
            anchor: snapshot.anchor,
            pos: snapshot.position,
            age_min: snapshot.age_minutes,
            activity: snapshot.activity,
        }
    }
}

/// Payload for alert transitions
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp of the cycle (epoch ms)
    pub ts: i64,
    pub entity: String,
    pub from: SafetyState,
    pub to: SafetyState,
    pub dist_m: f64,
    pub forecast_m: f64,
    /// True when the entity entered an alerting state, false when it left one
    pub raised: bool,
}

impl AlertPayload {
    /// Alert for a transition that touches an alerting state, else None
    pub fn from_transition(transition: &StateTransition, site: String, ts: i64) -> Option<Self> {
        if !transition.to.is_alert() && !transition.from.is_alert() {
            return None;
        }
        Some(Self {
            site,
            ts,
            entity: transition.entity_id.to_string(),
            from: transition.from,
            to: transition.to,
            dist_m: transition.filtered_distance_m,
            forecast_m: transition.forecast_distance_m,
            raised: transition.to.is_alert(),
        })
    }
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: i64,
    pub cycles_total: u64,
    pub avg_cycle_latency_us: u64,
    pub max_cycle_latency_us: u64,
    /// Cycle latency histogram buckets (Prometheus-style exponential)
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p99_us: u64,
    pub tracked: usize,
    /// (state, entity count) pairs in state order
    pub states: Vec<(SafetyState, u64)>,
    pub accepted: u64,
    pub rejected: u64,
    pub breaches_total: u64,
    pub forecast_breaches_total: u64,
    pub stale_total: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, site: String, ts: i64) -> Self {
        let states = SafetyState::ALL
            .iter()
            .map(|s| (*s, summary.entities_by_state[s.index()]))
            .collect();
        Self {
            site,
            ts,
            cycles_total: summary.cycles_total,
            avg_cycle_latency_us: summary.avg_cycle_latency_us,
            max_cycle_latency_us: summary.max_cycle_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p99_us: summary.lat_p99_us,
            tracked: summary.tracked_entities,
            states,
            accepted: summary.observations_accepted,
            rejected: summary.observations_rejected,
            breaches_total: summary.breaches_total,
            forecast_breaches_total: summary.forecast_breaches_total,
            stale_total: summary.stale_total,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Option<Arc<Metrics>>,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id, metrics: None }
    }

    /// Count dropped messages in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue every snapshot and every alert transition of a cycle
    pub fn send_report(&self, report: &CycleReport) {
        let ts = report.processed_at.timestamp_millis();
        for snapshot in &report.snapshots {
            let payload =
                SnapshotPayload::from_snapshot(snapshot, self.site_id.clone(), report.cycle, ts);
            self.send(EgressMessage::Snapshot(payload));
        }
        for transition in &report.transitions {
            if let Some(payload) = AlertPayload::from_transition(transition, self.site_id.clone(), ts)
            {
                self.send(EgressMessage::Alert(payload));
            }
        }
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary, ts: i64) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone(), ts);
        self.send(EgressMessage::Metrics(payload));
    }

    fn send(&self, message: EgressMessage) {
        // Use try_send to avoid blocking - drop if channel full
        if self.tx.try_send(message).is_err() {
            debug!("egress_message_dropped");
            if let Some(metrics) = &self.metrics {
                metrics.record_egress_dropped();
            }
        }
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
/// site_id is included in every payload for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
