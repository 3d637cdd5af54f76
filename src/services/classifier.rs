//! Geofence classification
//!
//! Maps sample freshness, anchor readiness and the filter outputs to a
//! single `SafetyState`. Rules are checked in priority order, first match
//! wins:
//! 1. stale sample → `Stale` (freshness overrides everything)
//! 2. not ready → `Initializing` / `Anchored`
//! 3. filtered distance over the radius → `Breach`
//! 4. forecast distance over the radius → `ForecastBreach`
//! 5. otherwise → `Safe`

use crate::domain::types::SafetyState;

/// Anchor/filter readiness of a record in the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No anchor yet
    Initializing,
    /// Anchor frozen during this cycle; no filter output yet
    JustAnchored,
    /// Anchor and filter initialized in an earlier cycle
    Ready,
}

/// Circular geofence around the per-entity anchor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceClassifier {
    safe_radius_m: f64,
    stale_threshold_minutes: f64,
}

impl GeofenceClassifier {
    pub fn new(safe_radius_m: f64, stale_threshold_minutes: f64) -> Self {
        Self { safe_radius_m, stale_threshold_minutes }
    }

    pub fn classify(
        &self,
        readiness: Readiness,
        age_minutes: f64,
        filtered_distance_m: f64,
        forecast_distance_m: f64,
    ) -> SafetyState {
        if self.is_stale(age_minutes) {
            return SafetyState::Stale;
        }
        match readiness {
            Readiness::Initializing => SafetyState::Initializing,
            Readiness::JustAnchored => SafetyState::Anchored,
            Readiness::Ready if filtered_distance_m > self.safe_radius_m => SafetyState::Breach,
            Readiness::Ready if forecast_distance_m > self.safe_radius_m => {
                SafetyState::ForecastBreach
            }
            Readiness::Ready => SafetyState::Safe,
        }
    }

    #[inline]
    pub fn is_stale(&self, age_minutes: f64) -> bool {
        age_minutes > self.stale_threshold_minutes
    }

    pub fn safe_radius_m(&self) -> f64 {
        self.safe_radius_m
    }

    pub fn stale_threshold_minutes(&self) -> f64 {
        self.stale_threshold_minutes
    }
}

impl Default for GeofenceClassifier {
    fn default() -> Self {
        Self::new(100.0, 5.0)
    }
}
