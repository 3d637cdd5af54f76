//! Engine parameters (fixed for the lifetime of an engine)

use crate::domain::error::TrackerError;
use crate::services::kalman::KalmanParams;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    /// Geofence radius around the anchor (m)
    pub safe_radius_m: f64,
    /// Samples older than this are reported `Stale` (minutes)
    pub stale_threshold_minutes: f64,
    /// Raw distances below this snap to zero (m)
    pub jitter_snap_m: f64,
    /// Displacement between `Safe` reports that counts as moving (m)
    pub movement_threshold_m: f64,
    /// Filtered distances kept per entity for trend reporting
    pub trend_capacity: usize,
    /// Raw positions kept per entity; the newest one is measured
    pub raw_window: usize,
    pub filter: KalmanParams,
    /// Entity ids that are never tracked (e.g. the account owner)
    pub ignored_entities: Vec<String>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            safe_radius_m: 100.0,
            stale_threshold_minutes: 5.0,
            jitter_snap_m: 5.0,
            movement_threshold_m: 5.0,
            trend_capacity: 30,
            raw_window: 1,
            filter: KalmanParams::default(),
            ignored_entities: Vec::new(),
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<(), TrackerError> {
        self.filter.validate()?;
        if !(self.safe_radius_m > 0.0) || !self.safe_radius_m.is_finite() {
            return Err(TrackerError::InvalidParameter {
                name: "safe_radius_m",
                value: self.safe_radius_m,
            });
        }
        for (name, value) in [
            ("stale_threshold_minutes", self.stale_threshold_minutes),
            ("jitter_snap_m", self.jitter_snap_m),
            ("movement_threshold_m", self.movement_threshold_m),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(TrackerError::InvalidParameter { name, value });
            }
        }
        if self.trend_capacity == 0 {
            return Err(TrackerError::InvalidParameter { name: "trend_capacity", value: 0.0 });
        }
        if self.raw_window == 0 {
            return Err(TrackerError::InvalidParameter { name: "raw_window", value: 0.0 });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = TrackerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.safe_radius_m, 100.0);
        assert_eq!(settings.stale_threshold_minutes, 5.0);
        assert_eq!(settings.jitter_snap_m, 5.0);
        assert_eq!(settings.trend_capacity, 30);
        assert_eq!(settings.filter.process_noise, 0.1);
        assert_eq!(settings.filter.measurement_noise, 5.0);
        assert_eq!(settings.filter.tick_length, 1.0);
    }

    #[test]
    fn test_invalid_values() {
        let settings = TrackerSettings { safe_radius_m: 0.0, ..TrackerSettings::default() };
        assert!(settings.validate().is_err());

        let settings = TrackerSettings { trend_capacity: 0, ..TrackerSettings::default() };
        assert!(settings.validate().is_err());

        let settings = TrackerSettings { jitter_snap_m: -1.0, ..TrackerSettings::default() };
        assert!(settings.validate().is_err());

        let mut settings = TrackerSettings::default();
        settings.filter.measurement_noise = 0.0;
        assert_eq!(settings.validate(), Err(TrackerError::InvalidMeasurementNoise(0.0)));
    }
}
