//! 1-D constant-velocity Kalman filter over distance-from-anchor
//!
//! State is the distance `x` (m) and its rate of change `v` (m per tick),
//! with the symmetric 2x2 covariance kept as `p_xx`, `p_vv`, `p_xv`.
//! Process noise follows the piecewise-constant acceleration model:
//!
//! ```text
//!        | dt^4/4  dt^3/2 |
//! Q = Qa |                |
//!        | dt^3/2  dt^2   |
//! ```
//!
//! The covariance correction is the sequential approximation used in the
//! field deployment, not the joint `(I - KH)P` form. Each line reads the
//! values already written by the line before it; reordering them changes
//! the filter trajectory.

use crate::domain::error::TrackerError;

/// Fixed filter parameters, shared by every entity's estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanParams {
    /// Acceleration noise Qa
    pub process_noise: f64,
    /// Distance measurement noise R (must be > 0)
    pub measurement_noise: f64,
    /// Logical tick length dt; one tick per processing cycle
    pub tick_length: f64,
    /// Initial Pxx
    pub initial_position_variance: f64,
    /// Initial Pvv
    pub initial_velocity_variance: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            process_noise: 0.1,
            measurement_noise: 5.0,
            tick_length: 1.0,
            initial_position_variance: 10.0,
            initial_velocity_variance: 10.0,
        }
    }
}

impl KalmanParams {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if !(self.measurement_noise > 0.0) || !self.measurement_noise.is_finite() {
            return Err(TrackerError::InvalidMeasurementNoise(self.measurement_noise));
        }
        if !(self.tick_length > 0.0) || !self.tick_length.is_finite() {
            return Err(TrackerError::InvalidParameter {
                name: "tick_length",
                value: self.tick_length,
            });
        }
        for (name, value) in [
            ("process_noise", self.process_noise),
            ("initial_position_variance", self.initial_position_variance),
            ("initial_velocity_variance", self.initial_velocity_variance),
        ] {
            if !(value >= 0.0) || !value.is_finite() {
                return Err(TrackerError::InvalidParameter { name, value });
            }
        }
        Ok(())
    }
}

/// Reported result of one predict/update step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanOutput {
    /// max(0, x)
    pub filtered_distance_m: f64,
    /// max(0, x + v*dt)
    pub forecast_distance_m: f64,
    /// Raw rate estimate (m/tick), unclamped
    pub velocity: f64,
}

/// Per-entity distance estimator
#[derive(Debug, Clone)]
pub struct KalmanEstimator {
    x: f64,
    v: f64,
    p_xx: f64,
    p_vv: f64,
    p_xv: f64,
    params: KalmanParams,
}

impl KalmanEstimator {
    /// Create an estimator at distance 0 with zero velocity
    pub fn new(params: KalmanParams) -> Result<Self, TrackerError> {
        params.validate()?;
        Ok(Self::from_validated(params))
    }

    /// Construct from parameters that already passed `validate`
    pub(crate) fn from_validated(params: KalmanParams) -> Self {
        Self {
            x: 0.0,
            v: 0.0,
            p_xx: params.initial_position_variance,
            p_vv: params.initial_velocity_variance,
            p_xv: 0.0,
            params,
        }
    }

    /// Advance the model by one tick without a measurement.
    /// Returns the predicted (unclamped) distance.
    pub fn predict(&mut self) -> f64 {
        let dt = self.params.tick_length;
        let qa = self.params.process_noise;

        self.x += self.v * dt;

        self.p_xx += dt * (2.0 * self.p_xv + dt * self.p_vv) + qa * dt.powi(4) / 4.0;
        self.p_xv += dt * self.p_vv + qa * dt.powi(3) / 2.0;
        self.p_vv += qa * dt * dt;

        self.x
    }

    /// Incorporate a (preprocessed) distance measurement `z`
    pub fn update(&mut self, z: f64) -> Result<(), TrackerError> {
        let r = self.params.measurement_noise;
        if !(r > 0.0) {
            return Err(TrackerError::InvalidMeasurementNoise(r));
        }

        let s = self.p_xx + r;
        let k_x = self.p_xx / s;
        let k_v = self.p_xv / s;
        let y = z - self.x;

        self.x += k_x * y;
        self.v += k_v * y;

        self.p_xx *= 1.0 - k_x;
        self.p_xv = self.p_xv * (1.0 - k_x) - self.p_xx * k_v;
        self.p_vv -= self.p_xv * k_v;

        Ok(())
    }

    /// One full cycle: predict, then update with `z`
    pub fn step(&mut self, z: f64) -> Result<KalmanOutput, TrackerError> {
        self.predict();
        self.update(z)?;
        Ok(self.output())
    }

    /// Clamped outputs for the current state
    pub fn output(&self) -> KalmanOutput {
        KalmanOutput {
            filtered_distance_m: self.x.max(0.0),
            forecast_distance_m: self.forecast(1).max(0.0),
            velocity: self.v,
        }
    }

    /// Extrapolate `steps` ticks ahead (unclamped)
    pub fn forecast(&self, steps: u32) -> f64 {
        self.x + self.v * self.params.tick_length * f64::from(steps)
    }

    pub fn distance(&self) -> f64 {
        self.x
    }

    pub fn velocity(&self) -> f64 {
        self.v
    }

    /// Covariance as (Pxx, Pvv, Pxv)
    pub fn covariance(&self) -> (f64, f64, f64) {
        (self.p_xx, self.p_vv, self.p_xv)
    }

    pub fn params(&self) -> &KalmanParams {
        &self.params
    }
}

/// Snap sub-threshold raw distances to zero so stationary GPS jitter is not
/// tracked as motion
#[inline]
pub fn snap_jitter(raw_distance_m: f64, jitter_snap_m: f64) -> f64 {
    if raw_distance_m < jitter_snap_m {
        0.0
    } else {
        raw_distance_m
    }
}
