//! `abyss-hal` – vehicle hardware seams.
//!
//! The vehicle station only ever talks to these traits, so real drivers and
//! the in-process stubs in [`sim`] are interchangeable.
//!
//! # Modules
//!
//! - [`camera`] – [`Camera`]: encoded frame capture.
//! - [`sensors`] – [`Imu`] and [`Sonar`].
//! - [`thrusters`] – [`Thrusters`]: six-channel propulsion.
//! - [`rig`] – [`VehicleHardware`]: one boxed driver per role.
//! - [`sim`] – stub drivers and the [`SimRig`][sim::SimRig] builder.

pub mod camera;
pub mod rig;
pub mod sensors;
pub mod sim;
pub mod thrusters;

pub use camera::{Camera, CameraFrame};
pub use rig::VehicleHardware;
pub use sensors::{Imu, Sonar};
pub use thrusters::Thrusters;
