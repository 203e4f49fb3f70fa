//! Outbound thruster commands.
//!
//! [`CommandChannel::send`] encodes and transmits a command once.  Failures
//! are logged and returned but never retried: in a real-time control loop a
//! stale command is worse than a dropped one.

use std::sync::Arc;

use abyss_types::{LinkError, ThrusterCommand};
use tracing::{debug, warn};

use crate::codec::encode_command;
use crate::transport::DatagramTransport;

/// Fire-and-forget command sender.
#[derive(Clone)]
pub struct CommandChannel {
    transport: Arc<dyn DatagramTransport>,
}

impl CommandChannel {
    pub fn new(transport: Arc<dyn DatagramTransport>) -> Self {
        Self { transport }
    }

    /// Encode and transmit `command`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Transmit`] when encoding or sending failed.  The error
    /// has already been logged; callers may ignore it.
    pub async fn send(&self, command: ThrusterCommand) -> Result<(), LinkError> {
        let result = match encode_command(&command) {
            Ok(bytes) => self.transport.send(&bytes).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => debug!(speeds = ?command.speeds(), "command sent"),
            Err(e) => warn!(error = %e, speeds = ?command.speeds(), "command dropped"),
        }
        result
    }
}
