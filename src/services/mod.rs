//! Services - estimation and classification logic
//!
//! This module contains the core business logic services:
//! - `engine` - Per-cycle orchestration over all tracked entities
//! - `runner` - Async loop feeding batches into the engine on a poll interval
//! - `registry` - Entity id to tracker record map
//! - `record` - Per-entity tracking state
//! - `anchor` - One-time anchor assignment and filter initialisation
//! - `kalman` - 1-D constant-velocity Kalman filter over anchor distance
//! - `classifier` - Safety state rules
//! - `history` - Bounded trend history
//! - `settings` - Engine parameters

pub mod anchor;
pub mod classifier;
pub mod engine;
pub mod history;
pub mod kalman;
pub mod record;
pub mod registry;
pub mod runner;
pub mod settings;

// Re-export commonly used types
pub use engine::{CycleReport, StateTransition, TrackingEngine};
pub use kalman::{KalmanEstimator, KalmanParams};
pub use registry::TrackerRegistry;
pub use runner::{CycleClock, CycleRunner};
pub use settings::TrackerSettings;
