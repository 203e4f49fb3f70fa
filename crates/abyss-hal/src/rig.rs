//! The full driver set a vehicle station runs on.

use crate::camera::Camera;
use crate::sensors::{Imu, Sonar};
use crate::thrusters::Thrusters;

/// One driver per hardware role.
pub struct VehicleHardware {
    pub camera: Box<dyn Camera>,
    pub imu: Box<dyn Imu>,
    pub sonar: Box<dyn Sonar>,
    pub thrusters: Box<dyn Thrusters>,
}

impl VehicleHardware {
    /// `(camera, imu, sonar, thrusters)` driver ids, for startup logs.
    pub fn ids(&self) -> [&str; 4] {
        [
            self.camera.id(),
            self.imu.id(),
            self.sonar.id(),
            self.thrusters.id(),
        ]
    }
}
