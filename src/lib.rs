//! Geofence monitor library
//!
//! Anchors each tracked entity at its first fix, smooths its distance from
//! that anchor with a Kalman filter and classifies it every polling cycle.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
