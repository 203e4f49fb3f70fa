//! In-process stub drivers for headless runs and tests.
//!
//! [`SimRig`] builds a complete [`VehicleHardware`] set whose drivers always
//! succeed: a camera returning a fixed byte pattern, a level IMU, a sonar
//! with a fixed range below the vehicle, and thrusters that remember the last
//! speeds applied.  They are stand-ins, not sensor simulations.
//!
//! # Example
//!
//! ```rust
//! use abyss_hal::sim::SimRig;
//! use abyss_types::{ObjectType, Quaternion, Vec3};
//!
//! let mut hw = SimRig::new()
//!     .with_sonar_range(2.0)
//!     .with_object_type(ObjectType::Reef)
//!     .build();
//!
//! let echo = hw.sonar.read(Vec3::zero(), Quaternion::identity()).unwrap();
//! assert_eq!(echo.point, Vec3::new(0.0, 0.0, -2.0));
//! assert_eq!(echo.object_type, ObjectType::Reef);
//! ```

use std::sync::{Arc, Mutex};

use abyss_perception::transform::sonar_point;
use abyss_types::{
    ImuReading, LinkError, ObjectType, Quaternion, SonarReading, THRUSTER_COUNT, ThrusterSpeeds,
    Vec3,
};
use tracing::debug;

use crate::camera::{Camera, CameraFrame};
use crate::rig::VehicleHardware;
use crate::sensors::{Imu, Sonar};
use crate::thrusters::Thrusters;

/// Default stub frame size in bytes (two chunks once base64-encoded).
pub const DEFAULT_FRAME_BYTES: usize = 4_500;
/// Default stub sonar range.
pub const DEFAULT_SONAR_RANGE: f64 = 1.5;

// ────────────────────────────────────────────────────────────────────────────
// Stub camera
// ────────────────────────────────────────────────────────────────────────────

/// Returns `frame_bytes` bytes of a repeating pattern that shifts by one
/// every capture.
pub struct SimCamera {
    id: String,
    frame_bytes: usize,
    captured: u64,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, frame_bytes: usize) -> Self {
        Self {
            id: id.into(),
            frame_bytes,
            captured: 0,
        }
    }

    /// The bytes the `n`th capture (0-based) returns.
    pub fn pattern(n: u64, frame_bytes: usize) -> Vec<u8> {
        (0..frame_bytes)
            .map(|i| ((i as u64 + n) % 251) as u8)
            .collect()
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, LinkError> {
        let encoded = Self::pattern(self.captured, self.frame_bytes);
        self.captured += 1;
        Ok(CameraFrame { encoded })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub IMU
// ────────────────────────────────────────────────────────────────────────────

/// Always level: reports the identity quaternion.
pub struct SimImu {
    id: String,
}

impl SimImu {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Imu for SimImu {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> Result<ImuReading, LinkError> {
        Ok(ImuReading {
            quaternion: Quaternion::identity(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub sonar
// ────────────────────────────────────────────────────────────────────────────

/// Reports a fixed range straight down the body −Z axis.
pub struct SimSonar {
    id: String,
    range: f64,
    object_type: ObjectType,
}

impl SimSonar {
    pub fn new(id: impl Into<String>, range: f64, object_type: ObjectType) -> Self {
        Self {
            id: id.into(),
            range,
            object_type,
        }
    }
}

impl Sonar for SimSonar {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self, position: Vec3, orientation: Quaternion) -> Result<SonarReading, LinkError> {
        Ok(SonarReading {
            point: sonar_point(position, orientation, self.range),
            distance: self.range,
            object_type: self.object_type,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub thrusters
// ────────────────────────────────────────────────────────────────────────────

/// Records the last applied speeds.  Clones share the record, so a test can
/// keep one clone and hand the other to the vehicle.
#[derive(Clone)]
pub struct SimThrusters {
    id: String,
    applied: Arc<Mutex<ThrusterSpeeds>>,
}

impl SimThrusters {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            applied: Arc::new(Mutex::new([0.0; THRUSTER_COUNT])),
        }
    }
}

impl Thrusters for SimThrusters {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, speeds: ThrusterSpeeds) -> Result<(), LinkError> {
        let mut applied = self.applied.lock().map_err(|_| LinkError::HardwareFault {
            component: self.id.clone(),
            details: "thruster record poisoned".to_string(),
        })?;
        *applied = speeds;
        debug!(thrusters = %self.id, ?speeds, "speeds applied");
        Ok(())
    }

    fn applied(&self) -> ThrusterSpeeds {
        *self.applied.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimRig builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a [`VehicleHardware`] made entirely of stubs.
pub struct SimRig {
    frame_bytes: usize,
    sonar_range: f64,
    object_type: ObjectType,
    thrusters: Option<SimThrusters>,
}

impl Default for SimRig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRig {
    pub fn new() -> Self {
        Self {
            frame_bytes: DEFAULT_FRAME_BYTES,
            sonar_range: DEFAULT_SONAR_RANGE,
            object_type: ObjectType::Sand,
            thrusters: None,
        }
    }

    pub fn with_frame_bytes(mut self, frame_bytes: usize) -> Self {
        self.frame_bytes = frame_bytes;
        self
    }

    pub fn with_sonar_range(mut self, range: f64) -> Self {
        self.sonar_range = range;
        self
    }

    /// Label the sonar attaches to every echo.
    pub fn with_object_type(mut self, object_type: ObjectType) -> Self {
        self.object_type = object_type;
        self
    }

    /// Use a caller-held [`SimThrusters`] so applied speeds can be inspected.
    pub fn with_thrusters(mut self, thrusters: SimThrusters) -> Self {
        self.thrusters = Some(thrusters);
        self
    }

    pub fn build(self) -> VehicleHardware {
        VehicleHardware {
            camera: Box::new(SimCamera::new("sim_camera", self.frame_bytes)),
            imu: Box::new(SimImu::new("sim_imu")),
            sonar: Box::new(SimSonar::new(
                "sim_sonar",
                self.sonar_range,
                self.object_type,
            )),
            thrusters: Box::new(
                self.thrusters
                    .unwrap_or_else(|| SimThrusters::new("sim_thrusters")),
            ),
        }
    }
}
