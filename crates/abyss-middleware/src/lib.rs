//! `abyss-middleware` – the link between operator and vehicle.
//!
//! Moves bytes and events without interpreting sensor content.
//!
//! # Modules
//!
//! - [`codec`] – JSON wire format: packet classification, encoders, image
//!   chunking.
//! - [`reassembler`] – order-independent image frame reassembly with stale
//!   frame eviction.
//! - [`transport`] – [`DatagramTransport`] seam and its UDP implementation.
//! - [`command_channel`] – fire-and-forget thruster command sender.
//! - [`bus`] – topic-based broadcast bus for presentation consumers.

pub mod bus;
pub mod codec;
pub mod command_channel;
pub mod reassembler;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use codec::{Packet, RawSensorPacket};
pub use command_channel::CommandChannel;
pub use reassembler::ImageReassembler;
pub use transport::{Datagram, DatagramTransport, UdpTransport};
