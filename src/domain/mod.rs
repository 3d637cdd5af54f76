//! Domain models - core types shared by the estimation engine
//!
//! - `types` - entities, observations, safety states and snapshots
//! - `geo` - geodesic distance between GPS fixes
//! - `error` - contract and validation errors of the core

pub mod error;
pub mod geo;
pub mod types;

pub use error::TrackerError;
pub use types::{
    Activity, EntityId, GeoPoint, PositionObservation, RawObservation, SafetyState, TrackerSnapshot,
};
