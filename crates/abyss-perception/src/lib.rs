//! `abyss-perception` – where the vehicle is and what lies beneath it.
//!
//! # Modules
//!
//! - [`transform`] – quaternion → rotation matrix, sonar echo projection.
//! - [`estimator`] – [`PositionEstimator`][estimator::PositionEstimator]:
//!   dead reckoning from thruster speeds.
//! - [`terrain`] – [`TerrainMapper`][terrain::TerrainMapper]: deduplicated,
//!   bounded terrain point cloud with parallel label sequence.
//! - [`terrain_log`] – append-only CSV persistence of the terrain map.

pub mod estimator;
pub mod terrain;
pub mod terrain_log;
pub mod transform;

pub use estimator::PositionEstimator;
pub use terrain::{MapperConfig, TerrainMap, TerrainMapper};
pub use terrain_log::TerrainLog;
pub use transform::RotationMatrix;
