//! Per-entity tracking record

use crate::domain::types::{Activity, EntityId, GeoPoint, SafetyState};
use crate::services::history::{BoundedHistory, TrendHistory};
use crate::services::kalman::{KalmanEstimator, KalmanOutput};
use chrono::{DateTime, Utc};

/// Tracking state owned by exactly one entity
///
/// Anchor and estimator are written once, together, by `AnchorManager`.
#[derive(Debug, Clone)]
pub struct TrackerRecord {
    pub(crate) entity_id: EntityId,
    pub(crate) anchor: Option<GeoPoint>,
    pub(crate) estimator: Option<KalmanEstimator>,
    pub(crate) ready: bool,
    pub(crate) raw_positions: BoundedHistory<GeoPoint>,
    pub(crate) trend: TrendHistory,
    /// Sample time of the newest accepted observation
    pub(crate) last_sample_at: Option<DateTime<Utc>>,
    /// Filter output of the newest measurement update
    pub(crate) last_output: Option<KalmanOutput>,
    /// State reported in the most recent cycle
    pub(crate) last_state: SafetyState,
    /// Position at the last `Safe` report, for the movement hint
    pub(crate) last_reported_position: Option<GeoPoint>,
    /// Movement hint from the newest `Safe` classification
    pub(crate) last_activity: Option<Activity>,
}

impl TrackerRecord {
    pub fn new(entity_id: EntityId, raw_window: usize, trend_capacity: usize) -> Self {
        Self {
            entity_id,
            anchor: None,
            estimator: None,
            ready: false,
            raw_positions: BoundedHistory::new(raw_window),
            trend: TrendHistory::new(trend_capacity),
            last_sample_at: None,
            last_output: None,
            last_state: SafetyState::Initializing,
            last_reported_position: None,
            last_activity: None,
        }
    }

    /// Record a raw position and its sample time
    pub fn add_reading(&mut self, position: GeoPoint, sampled_at: DateTime<Utc>) {
        self.raw_positions.push(position);
        self.last_sample_at = Some(sampled_at);
    }

    /// Newest raw position, if any
    pub fn latest_position(&self) -> Option<GeoPoint> {
        self.raw_positions.latest().copied()
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn anchor(&self) -> Option<GeoPoint> {
        self.anchor
    }

    pub fn estimator(&self) -> Option<&KalmanEstimator> {
        self.estimator.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn trend(&self) -> &TrendHistory {
        &self.trend
    }

    pub fn last_sample_at(&self) -> Option<DateTime<Utc>> {
        self.last_sample_at
    }

    pub fn last_output(&self) -> Option<KalmanOutput> {
        self.last_output
    }

    pub fn last_state(&self) -> SafetyState {
        self.last_state
    }

    pub fn last_activity(&self) -> Option<Activity> {
        self.last_activity
    }
}
