//! Orientation and ranging sensor traits.
//!
//! The sonar is read after the IMU each cycle and receives the vehicle's
//! current position estimate and orientation, so a driver can report the
//! echo point in world coordinates alongside the raw range.

use abyss_types::{ImuReading, LinkError, Quaternion, SonarReading, Vec3};

/// Orientation sensor.
pub trait Imu: Send {
    fn id(&self) -> &str;

    /// # Errors
    ///
    /// [`LinkError::HardwareFault`] when the sensor cannot be read.
    fn read(&mut self) -> Result<ImuReading, LinkError>;
}

/// Downward-looking ranging sensor with terrain classification.
pub trait Sonar: Send {
    fn id(&self) -> &str;

    /// # Errors
    ///
    /// [`LinkError::HardwareFault`] when no echo could be read.
    fn read(&mut self, position: Vec3, orientation: Quaternion) -> Result<SonarReading, LinkError>;
}
