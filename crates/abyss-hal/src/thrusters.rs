//! Generic `Thrusters` trait for the six-channel propulsion set.
//!
//! The vehicle's command listener forwards every decoded command here after
//! recording it in the shared state.

use abyss_types::{LinkError, ThrusterSpeeds};

pub trait Thrusters: Send {
    fn id(&self) -> &str;

    /// Drive every channel at `speeds` (each already in `[-1, 1]`).
    ///
    /// # Errors
    ///
    /// [`LinkError::HardwareFault`] when the driver rejects the command.
    fn apply(&mut self, speeds: ThrusterSpeeds) -> Result<(), LinkError>;

    /// The speeds most recently applied.
    fn applied(&self) -> ThrusterSpeeds;
}
