//! Per-cycle geofence processing
//!
//! The engine owns the registry and runs one polling cycle at a time:
//! - Admission (validation, ignored entities, one observation per entity)
//! - Anchor establishment for new entities
//! - Filter step and classification for anchored entities
//! - Age-based re-classification of entities absent from the batch
//!
//! Every resident entity gets exactly one snapshot per cycle.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::error::TrackerError;
use crate::domain::types::{EntityId, RawObservation, SafetyState, TrackerSnapshot};
use crate::infra::metrics::Metrics;
use crate::services::anchor::AnchorManager;
use crate::services::classifier::GeofenceClassifier;
use crate::services::record::TrackerRecord;
use crate::services::registry::TrackerRegistry;
use crate::services::settings::TrackerSettings;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Change of an entity's safety state between two cycles
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub entity_id: EntityId,
    pub from: SafetyState,
    pub to: SafetyState,
    pub filtered_distance_m: f64,
    pub forecast_distance_m: f64,
}

/// Everything one cycle produced, in entity order
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub processed_at: DateTime<Utc>,
    pub snapshots: Vec<TrackerSnapshot>,
    pub transitions: Vec<StateTransition>,
    /// Observations that reached the filter stage
    pub accepted: usize,
    /// Observations dropped as malformed
    pub rejected: usize,
    /// Observations for ignored entities
    pub ignored: usize,
}

impl CycleReport {
    pub fn snapshot(&self, entity_id: &str) -> Option<&TrackerSnapshot> {
        self.snapshots.iter().find(|s| s.entity_id.as_str() == entity_id)
    }

    /// Count of snapshots per state, indexed by `SafetyState::index`
    pub fn state_counts(&self) -> [u64; SafetyState::ALL.len()] {
        let mut counts = [0u64; SafetyState::ALL.len()];
        for snapshot in &self.snapshots {
            counts[snapshot.safety_state.index()] += 1;
        }
        counts
    }
}

/// Geofence tracking engine for one site
pub struct TrackingEngine {
    pub(crate) settings: TrackerSettings,
    pub(crate) registry: TrackerRegistry,
    pub(crate) anchors: AnchorManager,
    pub(crate) classifier: GeofenceClassifier,
    pub(crate) ignored: FxHashSet<String>,
    pub(crate) metrics: Option<Arc<Metrics>>,
    pub(crate) cycle: u64,
}

impl TrackingEngine {
    /// Validate `settings` and build an engine with an empty registry
    pub fn new(settings: TrackerSettings) -> Result<Self, TrackerError> {
        settings.validate()?;
        let anchors = AnchorManager::new(settings.filter)?;
        let classifier =
            GeofenceClassifier::new(settings.safe_radius_m, settings.stale_threshold_minutes);
        let registry = TrackerRegistry::new(settings.raw_window, settings.trend_capacity);
        let ignored = settings.ignored_entities.iter().cloned().collect();
        Ok(Self { settings, registry, anchors, classifier, ignored, metrics: None, cycle: 0 })
    }

    pub fn with_metrics(
        settings: TrackerSettings,
        metrics: Arc<Metrics>,
    ) -> Result<Self, TrackerError> {
        let mut engine = Self::new(settings)?;
        engine.metrics = Some(metrics);
        Ok(engine)
    }

    /// Run one polling cycle over `batch` with `now` as the freshness reference.
    ///
    /// Malformed observations are skipped; an empty batch only re-classifies
    /// resident entities. Errors are contract violations only.
    pub fn process_cycle(
        &mut self,
        batch: &[RawObservation],
        now: DateTime<Utc>,
    ) -> Result<CycleReport, TrackerError> {
        let started = Instant::now();
        self.cycle += 1;

        let admitted = self.admit(batch);
        let mut observed: FxHashSet<EntityId> = FxHashSet::default();
        let mut transitions = Vec::new();

        for observation in &admitted.observations {
            let handle = self.registry.resolve(&observation.entity_id);
            let mut record = handle.lock();
            let state = self.observe(&mut record, observation, now)?;
            if let Some(transition) = self.settle(&mut record, state) {
                transitions.push(transition);
            }
            observed.insert(observation.entity_id.clone());
        }

        let mut snapshots = Vec::with_capacity(self.registry.len());
        for (entity_id, handle) in self.registry.records() {
            let mut record = handle.lock();
            let is_observed = observed.contains(&entity_id);
            if !is_observed {
                let state = self.reclassify_absent(&record, now);
                if let Some(transition) = self.settle(&mut record, state) {
                    transitions.push(transition);
                }
            }
            snapshots.push(self.snapshot_of(&record, now, is_observed));
        }

        let report = CycleReport {
            cycle: self.cycle,
            processed_at: now,
            snapshots,
            transitions,
            accepted: admitted.observations.len(),
            rejected: admitted.rejected,
            ignored: admitted.ignored,
        };

        let latency_us = started.elapsed().as_micros() as u64;
        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(latency_us, report.accepted, report.rejected, report.ignored);
            for transition in &report.transitions {
                metrics.record_transition(transition.to);
            }
            metrics.set_state_counts(&report.state_counts());
        }

        info!(
            cycle = %report.cycle,
            entities = %report.snapshots.len(),
            accepted = %report.accepted,
            rejected = %report.rejected,
            ignored = %report.ignored,
            transitions = %report.transitions.len(),
            latency_us = %latency_us,
            "cycle_processed"
        );

        Ok(report)
    }

    /// Record `state` as the entity's current state, logging a change
    fn settle(&self, record: &mut TrackerRecord, state: SafetyState) -> Option<StateTransition> {
        let from = record.last_state;
        record.last_state = state;
        if from == state {
            return None;
        }

        let (filtered, forecast) = reported_distances(record, state);
        match state {
            SafetyState::Breach => warn!(
                entity = %record.entity_id,
                from = %from,
                distance_m = format!("{:.1}", filtered),
                radius_m = %self.settings.safe_radius_m,
                "geofence_breach"
            ),
            SafetyState::ForecastBreach => warn!(
                entity = %record.entity_id,
                from = %from,
                distance_m = format!("{:.1}", filtered),
                forecast_m = format!("{:.1}", forecast),
                radius_m = %self.settings.safe_radius_m,
                "forecast_breach"
            ),
            SafetyState::Stale => warn!(
                entity = %record.entity_id,
                from = %from,
                threshold_min = %self.settings.stale_threshold_minutes,
                "entity_stale"
            ),
            _ => debug!(entity = %record.entity_id, from = %from, to = %state, "state_changed"),
        }

        Some(StateTransition {
            entity_id: record.entity_id.clone(),
            from,
            to: state,
            filtered_distance_m: filtered,
            forecast_distance_m: forecast,
        })
    }

    pub fn registry(&self) -> &TrackerRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub fn classifier(&self) -> &GeofenceClassifier {
        &self.classifier
    }

    /// Number of cycles processed since creation or the last reset
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    /// End the tracking session: drop every record and restart cycle numbering
    pub fn reset(&mut self) {
        self.registry.reset();
        self.cycle = 0;
        info!("tracking_reset");
    }
}

/// Distances a snapshot reports for `state`.
///
/// Entities without a live filter reading (not yet ready, or stale) report 0.
fn reported_distances(record: &TrackerRecord, state: SafetyState) -> (f64, f64) {
    match (state, record.last_output) {
        (SafetyState::Initializing | SafetyState::Anchored | SafetyState::Stale, _) => (0.0, 0.0),
        (_, Some(output)) => (output.filtered_distance_m, output.forecast_distance_m),
        (_, None) => (0.0, 0.0),
    }
}
