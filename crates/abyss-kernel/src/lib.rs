//! `abyss-kernel` – admission and supervision.
//!
//! Decides what the operator station is allowed to act on and notices when
//! the vehicle goes quiet.
//!
//! # Modules
//!
//! - [`validator`] – [`SensorValidator`][validator::SensorValidator]: a rule
//!   engine that checks raw sensor packets for required fields and shapes
//!   before converting them into typed
//!   [`SensorPacket`][abyss_types::SensorPacket]s.
//! - [`watchdog`] – [`LinkWatchdog`][watchdog::LinkWatchdog]: heartbeat
//!   tracking for the telemetry and imagery streams.

pub mod validator;
pub mod watchdog;

pub use validator::{FieldRule, FieldShape, Rule, SensorValidator};
pub use watchdog::{LinkStream, LinkWatchdog, StreamHealth};
