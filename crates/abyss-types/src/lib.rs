//! `abyss-types` – shared vocabulary for the drone link.
//!
//! Every other crate speaks in these types: the packets that cross the
//! datagram link, the vehicle state both stations reason about, the terrain
//! points produced by the mapper, the events published on the internal bus,
//! and the error taxonomy of the protocol layer.

pub mod geometry;

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use geometry::{Quaternion, Vec3};

/// Number of thruster channels on the vehicle.
pub const THRUSTER_COUNT: usize = 6;

/// Raw per-channel thruster speeds, each in `[-1, 1]`.
pub type ThrusterSpeeds = [f64; THRUSTER_COUNT];

// ────────────────────────────────────────────────────────────────────────────
// Control
// ────────────────────────────────────────────────────────────────────────────

/// A six-channel thruster command sent from the operator to the vehicle.
///
/// Serialises as `{"thruster_speeds": [f64; 6]}`.  Speeds are clamped to
/// `[-1, 1]` on construction.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThrusterCommand {
    thruster_speeds: ThrusterSpeeds,
}

impl ThrusterCommand {
    /// Build a command, clamping every channel into `[-1, 1]`.
    pub fn new(speeds: ThrusterSpeeds) -> Self {
        Self::clamped(speeds).0
    }

    /// Build a command and report whether any channel had to be clamped.
    ///
    /// Non-finite channels are replaced by `0.0` and count as clamped.
    pub fn clamped(speeds: ThrusterSpeeds) -> (Self, bool) {
        let mut adjusted = false;
        let thruster_speeds = speeds.map(|s| {
            let c = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
            if c != s {
                adjusted = true;
            }
            c
        });
        (Self { thruster_speeds }, adjusted)
    }

    /// All channels at zero.
    pub fn stop() -> Self {
        Self::default()
    }

    /// The per-channel speeds.
    pub fn speeds(&self) -> ThrusterSpeeds {
        self.thruster_speeds
    }
}

/// Who is producing thruster commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Commands come from operator input.
    #[default]
    Manual,
    /// Commands come from the route follower.
    Auto,
}

/// Vehicle state: estimated position, current and previous thruster speeds,
/// and the control mode.
///
/// The vehicle owns the authoritative copy; the operator keeps a mirror
/// refreshed from telemetry.  Both sides keep it behind a single lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DroneState {
    pub position: Vec3,
    pub thruster_speeds: ThrusterSpeeds,
    pub previous_thruster_speeds: ThrusterSpeeds,
    pub mode: ControlMode,
}

impl DroneState {
    /// Store `speeds` as the current speeds, shifting the old ones into
    /// `previous_thruster_speeds`.  Returns `true` when the speeds changed.
    pub fn record_speeds(&mut self, speeds: ThrusterSpeeds) -> bool {
        self.previous_thruster_speeds = self.thruster_speeds;
        self.thruster_speeds = speeds;
        self.previous_thruster_speeds != speeds
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Terrain
// ────────────────────────────────────────────────────────────────────────────

/// Closed set of terrain classifications attached to ranging points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Sand,
    Rock,
    Coral,
    Reef,
    #[default]
    Empty,
}

impl ObjectType {
    /// Every variant, in declaration order.
    pub const ALL: [ObjectType; 5] = [
        ObjectType::Sand,
        ObjectType::Rock,
        ObjectType::Coral,
        ObjectType::Reef,
        ObjectType::Empty,
    ];

    /// The wire / log label.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Sand => "sand",
            ObjectType::Rock => "rock",
            ObjectType::Coral => "coral",
            ObjectType::Reef => "reef",
            ObjectType::Empty => "empty",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown object type '{s}'"))
    }
}

/// A ranging-derived world-space point with its classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainPoint {
    pub position: Vec3,
    pub object_type: ObjectType,
}

// ────────────────────────────────────────────────────────────────────────────
// Telemetry packets
// ────────────────────────────────────────────────────────────────────────────

/// IMU section of a sensor packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    pub quaternion: Quaternion,
}

/// Sonar section of a sensor packet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SonarReading {
    /// Point the vehicle itself computed for the echo.
    pub point: Vec3,
    /// Range to the detected surface.
    pub distance: f64,
    pub object_type: ObjectType,
}

/// A validated telemetry packet from the vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorPacket {
    /// Seconds since the Unix epoch at capture time.
    pub timestamp: f64,
    pub imu: ImuReading,
    pub sonar: SonarReading,
    pub thruster_speeds: ThrusterSpeeds,
    /// Monotonically increasing per vehicle run.
    pub frame_id: u64,
}

/// One slice of a chunked, base64-encoded camera frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageChunk {
    pub frame_id: u64,
    /// 0-based, unique within a frame.
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Opaque base64 text.
    pub data: String,
}

/// A fully reassembled camera frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledFrame {
    pub frame_id: u64,
    /// Concatenated chunk payloads in index order (base64 text).
    pub data: String,
}

impl AssembledFrame {
    /// Decode the base64 payload into the encoded image bytes.
    pub fn decode_image(&self) -> Result<Vec<u8>, DecodeError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| DecodeError::Base64(e.to_string()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the station event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"abyss-runtime::operator"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Data routed to presentation consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Telemetry(TelemetrySnapshot),
    FrameAssembled(AssembledFrame),
    TerrainPoint(TerrainPoint),
    CommandSent(ThrusterCommand),
    LinkFault { component: String, message: String },
}

/// Operator-side view of the vehicle after a sensor packet was applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub frame_id: u64,
    pub timestamp: f64,
    pub estimated_position: Vec3,
    pub thruster_speeds: ThrusterSpeeds,
    pub distance: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// A datagram could not be turned into a packet.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("datagram is not valid UTF-8")]
    Utf8,

    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("packet has no recognisable discriminator")]
    MissingDiscriminator,

    #[error("malformed {kind} packet: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("chunk {chunk_index} out of range for frame {frame_id} ({total_chunks} chunks)")]
    ChunkOutOfRange {
        frame_id: u64,
        chunk_index: u32,
        total_chunks: u32,
    },

    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

/// A well-formed sensor packet is missing or has a wrongly shaped field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

/// Error taxonomy of the protocol layer.  None of these is fatal.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No datagram arrived this cycle.  Normal idle, not a failure.
    #[error("no datagram available")]
    Timeout,

    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("transmit error: {0}")]
    Transmit(String),

    #[error("hardware fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl LinkError {
    /// True for the "nothing received" case that callers treat as idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, LinkError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thruster_command_wire_shape() {
        let cmd = ThrusterCommand::new([0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        let json = serde_json::to_string(&cmd).unwrap();
        assert_eq!(json, r#"{"thruster_speeds":[0.5,0.5,0.0,0.0,0.0,0.0]}"#);
    }

    #[test]
    fn thruster_command_clamps_out_of_range_channels() {
        let (cmd, clamped) = ThrusterCommand::clamped([2.0, -3.0, 0.25, f64::NAN, 0.0, 1.0]);
        assert!(clamped);
        assert_eq!(cmd.speeds(), [1.0, -1.0, 0.25, 0.0, 0.0, 1.0]);

        let (_, clamped) = ThrusterCommand::clamped([0.1; THRUSTER_COUNT]);
        assert!(!clamped);
    }

    #[test]
    fn object_type_labels_roundtrip() {
        for t in ObjectType::ALL {
            assert_eq!(t.as_str().parse::<ObjectType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
        assert!("kelp".parse::<ObjectType>().is_err());
    }

    #[test]
    fn record_speeds_shifts_previous() {
        let mut state = DroneState::default();
        assert!(state.record_speeds([0.5, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(state.previous_thruster_speeds, [0.0; THRUSTER_COUNT]);
        assert!(!state.record_speeds([0.5, 0.0, 0.0, 0.0, 0.0, 0.0]));
        assert_eq!(state.previous_thruster_speeds[0], 0.5);
    }

    #[test]
    fn sensor_packet_matches_wire_layout() {
        let raw = r#"{
            "timestamp": 12.5,
            "imu": {"quaternion": [1.0, 0.0, 0.0, 0.0]},
            "sonar": {"point": [0.0, 0.0, -3.0], "distance": 3.0, "object_type": "rock"},
            "thruster_speeds": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            "frame_id": 42
        }"#;
        let packet: SensorPacket = serde_json::from_str(raw).unwrap();
        assert_eq!(packet.frame_id, 42);
        assert_eq!(packet.sonar.object_type, ObjectType::Rock);
        assert_eq!(packet.imu.quaternion, Quaternion::identity());
    }

    #[test]
    fn assembled_frame_decodes_base64() {
        let frame = AssembledFrame {
            frame_id: 1,
            data: STANDARD.encode([0xFFu8, 0xD8, 0xFF]),
        };
        assert_eq!(frame.decode_image().unwrap(), vec![0xFF, 0xD8, 0xFF]);

        let bad = AssembledFrame {
            frame_id: 2,
            data: "not base64!".to_string(),
        };
        assert!(matches!(bad.decode_image(), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn only_timeout_is_idle() {
        assert!(LinkError::Timeout.is_idle());
        assert!(!LinkError::Transmit("down".into()).is_idle());
    }

    #[test]
    fn link_error_display() {
        let err = LinkError::HardwareFault {
            component: "sonar".to_string(),
            details: "no echo".to_string(),
        };
        assert!(err.to_string().contains("sonar"));

        let err: LinkError = ValidationError::MissingField("sonar.distance".into()).into();
        assert!(err.to_string().contains("sonar.distance"));
    }
}
