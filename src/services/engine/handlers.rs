//! Per-entity handlers for the engine's cycle loop

use super::TrackingEngine;
use crate::domain::error::TrackerError;
use crate::domain::geo::geodesic_distance_m;
use crate::domain::types::{
    age_minutes, Activity, EntityId, GeoPoint, PositionObservation, RawObservation, SafetyState,
    TrackerSnapshot,
};
use crate::services::classifier::Readiness;
use crate::services::kalman::snap_jitter;
use crate::services::record::TrackerRecord;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Observations that passed admission, one per entity, ordered by entity id
#[derive(Debug, Default)]
pub(crate) struct Admitted {
    pub observations: Vec<PositionObservation>,
    pub rejected: usize,
    pub ignored: usize,
}

impl TrackingEngine {
    /// Validate the batch, drop ignored entities and keep the newest sample
    /// per entity
    pub(crate) fn admit(&self, batch: &[RawObservation]) -> Admitted {
        let mut admitted = Admitted::default();
        let mut newest: FxHashMap<EntityId, PositionObservation> = FxHashMap::default();

        for raw in batch {
            if self.ignored.contains(raw.entity_id.as_str()) {
                admitted.ignored += 1;
                continue;
            }
            let observation = match raw.validate() {
                Ok(observation) => observation,
                Err(e) => {
                    warn!(entity = %raw.entity_id, error = %e, "observation_rejected");
                    admitted.rejected += 1;
                    continue;
                }
            };
            match newest.get(&observation.entity_id) {
                Some(existing) if existing.sampled_at >= observation.sampled_at => {
                    debug!(entity = %observation.entity_id, "duplicate_observation_dropped");
                }
                _ => {
                    newest.insert(observation.entity_id.clone(), observation);
                }
            }
        }

        admitted.observations = newest.into_values().collect();
        admitted.observations.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        admitted
    }

    /// Feed one fresh observation through anchor, filter and classifier
    pub(crate) fn observe(
        &self,
        record: &mut TrackerRecord,
        observation: &PositionObservation,
        now: DateTime<Utc>,
    ) -> Result<SafetyState, TrackerError> {
        record.add_reading(observation.position, observation.sampled_at);
        record.last_activity = None;

        let age = observation.age_minutes(now);
        if self.classifier.is_stale(age) {
            debug!(
                entity = %record.entity_id,
                age_min = format!("{:.1}", age),
                "stale_observation"
            );
            return Ok(SafetyState::Stale);
        }

        if !record.ready {
            let anchored = self.anchors.set_anchor_if_needed(record);
            if anchored {
                if let Some(metrics) = &self.metrics {
                    metrics.record_anchor_set();
                }
            }
            let readiness = if anchored { Readiness::JustAnchored } else { Readiness::Initializing };
            return Ok(self.classifier.classify(readiness, age, 0.0, 0.0));
        }

        let (Some(anchor), Some(position)) = (record.anchor, record.latest_position()) else {
            return Ok(self.classifier.classify(Readiness::Initializing, age, 0.0, 0.0));
        };
        let Some(estimator) = record.estimator.as_mut() else {
            return Ok(self.classifier.classify(Readiness::Initializing, age, 0.0, 0.0));
        };

        let raw_m = geodesic_distance_m(&anchor, &position);
        let z = snap_jitter(raw_m, self.settings.jitter_snap_m);
        let output = estimator.step(z)?;

        record.trend.push(output.filtered_distance_m);
        record.last_output = Some(output);

        debug!(
            entity = %record.entity_id,
            raw_m = format!("{:.1}", raw_m),
            filtered_m = format!("{:.1}", output.filtered_distance_m),
            forecast_m = format!("{:.1}", output.forecast_distance_m),
            velocity = format!("{:.2}", output.velocity),
            "filter_step"
        );

        let state = self.classifier.classify(
            Readiness::Ready,
            age,
            output.filtered_distance_m,
            output.forecast_distance_m,
        );
        if state == SafetyState::Safe {
            record.last_activity = Some(self.activity(record, position));
        }
        Ok(state)
    }

    /// Movement since the previous `Safe` report
    fn activity(&self, record: &mut TrackerRecord, position: GeoPoint) -> Activity {
        let moved_m = record
            .last_reported_position
            .map(|previous| geodesic_distance_m(&previous, &position))
            .unwrap_or(0.0);
        record.last_reported_position = Some(position);
        if moved_m < self.settings.movement_threshold_m {
            Activity::Stationary
        } else {
            Activity::Moving
        }
    }

    /// State of a resident entity that had no observation this cycle
    pub(crate) fn reclassify_absent(
        &self,
        record: &TrackerRecord,
        now: DateTime<Utc>,
    ) -> SafetyState {
        match record.last_sample_at {
            Some(sampled_at) if self.classifier.is_stale(age_minutes(sampled_at, now)) => {
                SafetyState::Stale
            }
            _ => record.last_state,
        }
    }

    pub(crate) fn snapshot_of(
        &self,
        record: &TrackerRecord,
        now: DateTime<Utc>,
        observed: bool,
    ) -> TrackerSnapshot {
        let state = record.last_state;
        let (filtered, forecast) = super::reported_distances(record, state);
        TrackerSnapshot {
            entity_id: record.entity_id.clone(),
            safety_state: state,
            filtered_distance_m: filtered,
            forecast_distance_m: forecast,
            trend_history: record.trend.snapshot(),
            anchor: record.anchor,
            position: record.latest_position(),
            age_minutes: record.last_sample_at.map(|t| age_minutes(t, now)),
            activity: if observed && state == SafetyState::Safe {
                record.last_activity
            } else {
                None
            },
            observed,
        }
    }
}
