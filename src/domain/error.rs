//! Error types for the estimation core
//!
//! Malformed observations are expected at runtime and are skipped by the
//! engine. The remaining variants are caller contract violations.

use crate::domain::types::{EntityId, GeoPoint};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackerError {
    #[error("malformed observation: {0}")]
    MalformedObservation(String),

    #[error("anchor already set for {entity} at {anchor}")]
    AnchorAlreadySet { entity: EntityId, anchor: GeoPoint },

    #[error("measurement noise must be positive, got {0}")]
    InvalidMeasurementNoise(f64),

    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

impl TrackerError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        TrackerError::MalformedObservation(reason.into())
    }
}
