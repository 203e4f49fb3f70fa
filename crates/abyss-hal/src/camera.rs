//! Generic `Camera` trait for the vehicle's imaging hardware.

use abyss_types::LinkError;

/// An encoded camera frame (e.g. JPEG bytes), ready for base64 chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    pub encoded: Vec<u8>,
}

/// A camera that produces encoded frames.
pub trait Camera: Send {
    /// Stable identifier, e.g. `"down_cam"`.
    fn id(&self) -> &str;

    /// Capture the next frame.
    ///
    /// # Errors
    ///
    /// [`LinkError::HardwareFault`] when no frame could be captured.
    fn capture(&mut self) -> Result<CameraFrame, LinkError>;
}
