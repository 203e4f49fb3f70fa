//! Dead-reckoning position estimate.
//!
//! Translation comes from three of the six thruster channels:
//!
//! | Channel | Axis |
//! |---|---|
//! | 0 (surge) | x |
//! | 1 (strafe) | y |
//! | 4 (vertical) | z |
//!
//! Channels 2, 3 and 5 do not translate the vehicle in this model.  There is
//! no drift correction; the estimate is `position + velocity · dt`, nothing
//! more.

use abyss_types::{DroneState, ThrusterSpeeds, Vec3};
use tracing::trace;

pub const SURGE_CHANNEL: usize = 0;
pub const STRAFE_CHANNEL: usize = 1;
pub const VERTICAL_CHANNEL: usize = 4;

/// Translational velocity implied by `speeds`.
pub fn commanded_velocity(speeds: &ThrusterSpeeds) -> Vec3 {
    Vec3::new(
        speeds[SURGE_CHANNEL],
        speeds[STRAFE_CHANNEL],
        speeds[VERTICAL_CHANNEL],
    )
}

/// `position + velocity · dt`
pub fn advance(position: Vec3, velocity: Vec3, dt: f64) -> Vec3 {
    position + velocity * dt
}

/// Integrates a [`DroneState`]'s current thruster speeds into its position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionEstimator {
    dt: f64,
}

impl PositionEstimator {
    /// An estimator stepping by `dt` seconds per [`step`](Self::step).
    pub fn new(dt: f64) -> Self {
        Self { dt }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Advance `state.position` by one step using `state.thruster_speeds`.
    /// Returns the new position.
    pub fn step(&self, state: &mut DroneState) -> Vec3 {
        self.step_by(state, self.dt)
    }

    /// Like [`step`](Self::step) with an explicit `dt`.
    pub fn step_by(&self, state: &mut DroneState, dt: f64) -> Vec3 {
        let velocity = commanded_velocity(&state.thruster_speeds);
        state.position = advance(state.position, velocity, dt);
        trace!(?velocity, position = ?state.position, dt, "position advanced");
        state.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_translation_channels_contribute() {
        let v = commanded_velocity(&[0.1, 0.2, 0.9, 0.9, 0.3, 0.9]);
        assert_eq!(v, Vec3::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn surge_and_strafe_over_ten_cycles() {
        let estimator = PositionEstimator::new(0.1);
        let mut state = DroneState {
            thruster_speeds: [0.5, 0.5, 0.0, 0.0, 0.0, 0.0],
            ..DroneState::default()
        };
        for _ in 0..10 {
            estimator.step(&mut state);
        }
        assert!(state.position.distance(Vec3::new(0.5, 0.5, 0.0)) < 1e-9);
    }

    #[test]
    fn constant_velocity_matches_closed_form() {
        let initial = Vec3::new(-2.0, 4.0, -10.0);
        let v = Vec3::new(0.3, -0.7, 0.25);
        let dt = 0.05;
        let n = 137;

        let mut p = initial;
        for _ in 0..n {
            p = advance(p, v, dt);
        }
        let expected = initial + v * (dt * n as f64);
        assert!(p.distance(expected) < 1e-9, "{p:?} vs {expected:?}");
    }

    #[test]
    fn zero_speeds_hold_position() {
        let estimator = PositionEstimator::new(0.1);
        let mut state = DroneState {
            position: Vec3::new(1.0, 1.0, 1.0),
            ..DroneState::default()
        };
        assert_eq!(estimator.step_by(&mut state, 5.0), Vec3::new(1.0, 1.0, 1.0));
    }
}
