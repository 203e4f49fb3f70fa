//! Transport codec: datagrams ⇄ packets.
//!
//! Every datagram carries exactly one JSON object.  Three shapes travel over
//! the link:
//!
//! | Direction | Shape | Discriminator |
//! |---|---|---|
//! | vehicle → operator | image chunk | `"type": "image_chunk"` |
//! | vehicle → operator | sensor packet | no `type`; has `imu` / `sonar` / `timestamp` / `frame_id` |
//! | operator → vehicle | thruster command | no `type`; only `thruster_speeds` |
//!
//! [`decode`] classifies a datagram once at the transport boundary.  Sensor
//! packets stay raw ([`RawSensorPacket`]) until the validator in
//! `abyss-kernel` admits them.
//!
//! Encoding never fails on size: each packet kind has a soft limit and going
//! over it only logs a warning.

use abyss_types::{DecodeError, ImageChunk, LinkError, SensorPacket, ThrusterCommand, THRUSTER_COUNT};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Soft size limit for an encoded thruster command.
pub const COMMAND_SOFT_LIMIT: usize = 1024;
/// Soft size limit for an encoded sensor packet.
pub const SENSOR_SOFT_LIMIT: usize = 1500;
/// Soft size limit for an encoded image chunk datagram.
pub const CHUNK_SOFT_LIMIT: usize = 4096;
/// Default number of base64 characters per image chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 4000;
/// Largest datagram either station reads.
pub const RECV_BUFFER_SIZE: usize = 8192;
/// Most chunks a single frame may claim (about 4 MB of base64 at the
/// default chunk size).  Larger counts are refused before any buffer exists.
pub const MAX_TOTAL_CHUNKS: u32 = 1024;

const IMAGE_CHUNK_TYPE: &str = "image_chunk";
const SENSOR_KEYS: [&str; 4] = ["imu", "sonar", "timestamp", "frame_id"];

// ────────────────────────────────────────────────────────────────────────────
// Packet
// ────────────────────────────────────────────────────────────────────────────

/// An unvalidated sensor packet body.
///
/// Only `abyss_kernel::SensorValidator` turns this into a typed
/// [`SensorPacket`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawSensorPacket(Value);

impl RawSensorPacket {
    /// Wrap a JSON value.  Used by the decoder and by tests.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    ImageChunk(ImageChunk),
    Sensor(RawSensorPacket),
    Command(ThrusterCommand),
    /// A well-formed object with a `type` this codec does not know.
    Unrecognized(String),
}

impl Packet {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::ImageChunk(_) => "image_chunk",
            Packet::Sensor(_) => "sensor",
            Packet::Command(_) => "command",
            Packet::Unrecognized(_) => "unrecognized",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────────────────

/// Decode one datagram.
///
/// # Errors
///
/// Returns a [`DecodeError`] for non-UTF-8 or non-JSON input, for JSON that
/// is not an object or carries no discriminator, and for image chunks or
/// commands whose fields are missing or mistyped.
pub fn decode(raw: &[u8]) -> Result<Packet, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::Utf8)?;
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::MissingDiscriminator);
    };

    let tag = match obj.get("type") {
        None => None,
        Some(Value::String(t)) => Some(t.clone()),
        Some(_) => {
            return Err(DecodeError::Malformed {
                kind: "packet",
                reason: "'type' must be a string".to_string(),
            });
        }
    };

    match tag.as_deref() {
        Some(IMAGE_CHUNK_TYPE) => decode_chunk(obj).map(Packet::ImageChunk),
        Some(other) => Ok(Packet::Unrecognized(other.to_string())),
        None if SENSOR_KEYS.iter().any(|k| obj.contains_key(*k)) => {
            Ok(Packet::Sensor(RawSensorPacket(Value::Object(obj))))
        }
        None if obj.contains_key("thruster_speeds") => command_from(&obj).map(Packet::Command),
        None => Err(DecodeError::MissingDiscriminator),
    }
}

/// Decode a datagram that must be a thruster command (vehicle side).
pub fn decode_command(raw: &[u8]) -> Result<ThrusterCommand, DecodeError> {
    match decode(raw)? {
        Packet::Command(cmd) => Ok(cmd),
        other => Err(DecodeError::Malformed {
            kind: "command",
            reason: format!("expected a thruster command, got a {} packet", other.kind()),
        }),
    }
}

fn decode_chunk(obj: Map<String, Value>) -> Result<ImageChunk, DecodeError> {
    let chunk: ImageChunk = serde_json::from_value(Value::Object(obj)).map_err(|e| {
        DecodeError::Malformed {
            kind: IMAGE_CHUNK_TYPE,
            reason: e.to_string(),
        }
    })?;
    if chunk.total_chunks > MAX_TOTAL_CHUNKS {
        return Err(DecodeError::Malformed {
            kind: IMAGE_CHUNK_TYPE,
            reason: format!(
                "total_chunks {} exceeds limit {MAX_TOTAL_CHUNKS}",
                chunk.total_chunks
            ),
        });
    }
    if chunk.chunk_index >= chunk.total_chunks {
        return Err(DecodeError::ChunkOutOfRange {
            frame_id: chunk.frame_id,
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
        });
    }
    Ok(chunk)
}

fn command_from(obj: &Map<String, Value>) -> Result<ThrusterCommand, DecodeError> {
    let malformed = |reason: String| DecodeError::Malformed {
        kind: "command",
        reason,
    };
    let raw = obj
        .get("thruster_speeds")
        .ok_or_else(|| malformed("missing 'thruster_speeds'".to_string()))?;
    let speeds: Vec<f64> = serde_json::from_value(raw.clone())
        .map_err(|e| malformed(format!("'thruster_speeds': {e}")))?;
    let speeds: [f64; THRUSTER_COUNT] = speeds.try_into().map_err(|v: Vec<f64>| {
        malformed(format!("expected {THRUSTER_COUNT} thruster speeds, got {}", v.len()))
    })?;

    let (cmd, clamped) = ThrusterCommand::clamped(speeds);
    if clamped {
        warn!(?speeds, "thruster speeds outside [-1, 1] were clamped");
    }
    Ok(cmd)
}

// ────────────────────────────────────────────────────────────────────────────
// Encoding
// ────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Tagged<'a> {
    ImageChunk(&'a ImageChunk),
}

/// Encode a thruster command.  Warns above [`COMMAND_SOFT_LIMIT`].
pub fn encode_command(cmd: &ThrusterCommand) -> Result<Vec<u8>, LinkError> {
    encode_with_limit(cmd, "command", COMMAND_SOFT_LIMIT)
}

/// Encode a sensor packet.  Warns above [`SENSOR_SOFT_LIMIT`].
pub fn encode_sensor(packet: &SensorPacket) -> Result<Vec<u8>, LinkError> {
    encode_with_limit(packet, "sensor", SENSOR_SOFT_LIMIT)
}

/// Encode an image chunk with its `type` tag.  Warns above
/// [`CHUNK_SOFT_LIMIT`].
pub fn encode_chunk(chunk: &ImageChunk) -> Result<Vec<u8>, LinkError> {
    encode_with_limit(&Tagged::ImageChunk(chunk), IMAGE_CHUNK_TYPE, CHUNK_SOFT_LIMIT)
}

fn encode_with_limit<T: Serialize>(
    value: &T,
    kind: &'static str,
    limit: usize,
) -> Result<Vec<u8>, LinkError> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| LinkError::Transmit(format!("failed to encode {kind}: {e}")))?;
    if bytes.len() > limit {
        warn!(kind, size = bytes.len(), limit, "datagram exceeds soft size limit");
    }
    Ok(bytes)
}

/// Split an encoded camera frame into chunks of at most `chunk_size` base64
/// characters, all tagged with `frame_id`.
///
/// An empty image yields no chunks.  A frame needing more than
/// [`MAX_TOTAL_CHUNKS`] is still split but logged, since receivers drop it.
pub fn chunk_image(frame_id: u64, image: &[u8], chunk_size: usize) -> Vec<ImageChunk> {
    let encoded = STANDARD.encode(image);
    let chunk_size = chunk_size.max(1);
    let total = encoded.len().div_ceil(chunk_size);
    let total_chunks = u32::try_from(total).unwrap_or(u32::MAX);
    if total_chunks > MAX_TOTAL_CHUNKS {
        warn!(frame_id, total_chunks, limit = MAX_TOTAL_CHUNKS, "frame exceeds chunk limit");
    }

    // base64 output is ASCII, so byte-slicing never splits a character.
    encoded
        .as_bytes()
        .chunks(chunk_size)
        .zip(0u32..)
        .map(|(slice, chunk_index)| ImageChunk {
            frame_id,
            chunk_index,
            total_chunks,
            data: String::from_utf8_lossy(slice).into_owned(),
        })
        .collect()
}
