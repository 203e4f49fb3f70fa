//! Body-to-world rotation.
//!
//! The IMU reports the vehicle's orientation as a scalar-first unit
//! quaternion.  [`RotationMatrix::from_quaternion`] turns it into the
//! equivalent 3×3 matrix:
//!
//! ```text
//!     ┌ 1 − 2(y² + z²)   2(xy − wz)       2(xz + wy)     ┐
//! R = │ 2(xy + wz)       1 − 2(x² + z²)   2(yz − wx)     │
//!     └ 2(xz − wy)       2(yz + wx)       1 − 2(x² + y²) ┘
//! ```
//!
//! The sonar looks straight down the body −Z axis, so an echo at range `d`
//! lands at `position + R · (0, 0, −d)` ([`sonar_point`]).
//!
//! # Example
//!
//! ```rust
//! use abyss_perception::transform::sonar_point;
//! use abyss_types::{Quaternion, Vec3};
//!
//! let p = sonar_point(Vec3::new(1.0, 2.0, 0.0), Quaternion::identity(), 3.0);
//! assert_eq!(p, Vec3::new(1.0, 2.0, -3.0));
//! ```

use abyss_types::{Quaternion, Vec3};

/// Row-major 3×3 rotation matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationMatrix {
    pub rows: [[f64; 3]; 3],
}

impl RotationMatrix {
    pub const fn identity() -> Self {
        Self {
            rows: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// Standard quaternion-to-matrix conversion.  `q` is assumed to be a
    /// unit quaternion; it is not normalised here.
    pub fn from_quaternion(q: Quaternion) -> Self {
        let Quaternion { w, x, y, z } = q;
        Self {
            rows: [
                [
                    1.0 - 2.0 * (y * y + z * z),
                    2.0 * (x * y - w * z),
                    2.0 * (x * z + w * y),
                ],
                [
                    2.0 * (x * y + w * z),
                    1.0 - 2.0 * (x * x + z * z),
                    2.0 * (y * z - w * x),
                ],
                [
                    2.0 * (x * z - w * y),
                    2.0 * (y * z + w * x),
                    1.0 - 2.0 * (x * x + y * y),
                ],
            ],
        }
    }

    /// `R · v`
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        let [r0, r1, r2] = self.rows;
        let dot = |r: [f64; 3]| r[0] * v.x + r[1] * v.y + r[2] * v.z;
        Vec3::new(dot(r0), dot(r1), dot(r2))
    }
}

impl Default for RotationMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

/// World-space position of a downward sonar echo at range `distance`.
pub fn sonar_point(position: Vec3, orientation: Quaternion, distance: f64) -> Vec3 {
    position + RotationMatrix::from_quaternion(orientation).rotate(Vec3::new(0.0, 0.0, -distance))
}
