//! `abyss-runtime` – station orchestration.
//!
//! Wires the codec, validator, estimator, mapper and hardware seams into the
//! two long-running processes of the link.
//!
//! # Modules
//!
//! - [`operator`] – [`OperatorStation`]: the periodic receive-and-process
//!   tick, command sending, auto-route scheduling and the event bus feed for
//!   presentation consumers.
//! - [`vehicle`] – [`VehicleStation`]: the command listener and the
//!   telemetry/imagery cycle running over an `abyss-hal` driver set.
//! - [`navigation`] – [`ManualInput`] presets and the looping
//!   [`RouteFollower`].
//! - [`tick_guard`] – [`TickGuard`]: skip-if-busy reentrancy guard for the
//!   operator tick.
//! - [`telemetry`] – [`init_tracing`]: `tracing` subscriber setup with an
//!   optional OTLP exporter.

pub mod navigation;
pub mod operator;
pub mod telemetry;
pub mod tick_guard;
pub mod vehicle;

pub use navigation::{ManualInput, NavigationError, RouteFollower, parse_waypoint};
pub use operator::{OperatorConfig, OperatorStation, TickReport};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use tick_guard::{TickGuard, TickPermit};
pub use vehicle::{CycleReport, VehicleConfig, VehicleStation};
