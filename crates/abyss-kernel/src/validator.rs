//! [`SensorValidator`] – admission rules for inbound sensor packets.
//!
//! The codec hands over a [`RawSensorPacket`] (plain JSON).  Every registered
//! [`Rule`] is evaluated in order; the first violation rejects the whole
//! packet and nothing downstream sees it.  Only a packet that passes every
//! rule is converted into a typed [`SensorPacket`].
//!
//! The default rule set requires:
//!
//! | Path | Shape |
//! |---|---|
//! | `timestamp` | number |
//! | `imu.quaternion` | 4 numbers |
//! | `sonar.point` | 3 numbers |
//! | `sonar.distance` | number |
//! | `sonar.object_type` | string |
//! | `thruster_speeds` | 6 numbers |
//! | `frame_id` | unsigned integer |
//!
//! An `object_type` label outside the closed set is not a rejection: it is
//! coerced to [`ObjectType::Empty`] with a warning, so unclassified terrain
//! still gets mapped.

use abyss_middleware::RawSensorPacket;
use abyss_types::{
    ImuReading, ObjectType, Quaternion, SensorPacket, SonarReading, THRUSTER_COUNT,
    ValidationError, Vec3,
};
use serde_json::Value;
use tracing::warn;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single structural requirement on a raw sensor packet.
pub trait Rule: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// `Ok(())` when `packet` satisfies the rule.
    fn check(&self, packet: &Value) -> Result<(), ValidationError>;
}

/// Expected JSON shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Number,
    UnsignedInteger,
    Text,
    /// An array of exactly this many numbers.
    NumberArray(usize),
}

/// Requires the dotted `path` to exist and to have `shape`.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub path: &'static str,
    pub shape: FieldShape,
}

impl FieldRule {
    pub const fn new(path: &'static str, shape: FieldShape) -> Self {
        Self { path, shape }
    }
}

impl Rule for FieldRule {
    fn name(&self) -> &str {
        self.path
    }

    fn check(&self, packet: &Value) -> Result<(), ValidationError> {
        let value =
            lookup(packet, self.path).ok_or_else(|| ValidationError::MissingField(self.path.into()))?;
        let invalid = |reason: String| ValidationError::InvalidField {
            field: self.path.to_string(),
            reason,
        };
        match self.shape {
            FieldShape::Number if value.is_number() => Ok(()),
            FieldShape::Number => Err(invalid("expected a number".into())),
            FieldShape::UnsignedInteger if value.is_u64() => Ok(()),
            FieldShape::UnsignedInteger => Err(invalid("expected an unsigned integer".into())),
            FieldShape::Text if value.is_string() => Ok(()),
            FieldShape::Text => Err(invalid("expected a string".into())),
            FieldShape::NumberArray(len) => match value.as_array() {
                Some(items) if items.len() == len && items.iter().all(Value::is_number) => Ok(()),
                Some(items) if items.len() != len => Err(invalid(format!(
                    "expected {len} numbers, got {}",
                    items.len()
                ))),
                Some(_) => Err(invalid("array contains a non-number".into())),
                None => Err(invalid(format!("expected an array of {len} numbers"))),
            },
        }
    }
}

/// The field rules every sensor packet must satisfy.
pub const REQUIRED_FIELDS: [FieldRule; 7] = [
    FieldRule::new("timestamp", FieldShape::Number),
    FieldRule::new("imu.quaternion", FieldShape::NumberArray(4)),
    FieldRule::new("sonar.point", FieldShape::NumberArray(3)),
    FieldRule::new("sonar.distance", FieldShape::Number),
    FieldRule::new("sonar.object_type", FieldShape::Text),
    FieldRule::new("thruster_speeds", FieldShape::NumberArray(THRUSTER_COUNT)),
    FieldRule::new("frame_id", FieldShape::UnsignedInteger),
];

// ────────────────────────────────────────────────────────────────────────────
// SensorValidator
// ────────────────────────────────────────────────────────────────────────────

/// Rule engine that admits or rejects raw sensor packets.
///
/// # Example
///
/// ```
/// use abyss_kernel::SensorValidator;
/// use abyss_middleware::RawSensorPacket;
/// use serde_json::json;
///
/// let validator = SensorValidator::new();
/// let raw = RawSensorPacket::new(json!({
///     "timestamp": 1.5,
///     "imu": { "quaternion": [1.0, 0.0, 0.0, 0.0] },
///     "sonar": { "point": [0.0, 0.0, -5.0], "distance": 5.0, "object_type": "kelp" },
///     "thruster_speeds": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
///     "frame_id": 3
/// }));
/// let packet = validator.validate(&raw).unwrap();
/// assert_eq!(packet.frame_id, 3);
/// assert_eq!(packet.sonar.object_type.as_str(), "empty");
/// ```
pub struct SensorValidator {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for SensorValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorValidator {
    /// A validator carrying [`REQUIRED_FIELDS`].
    pub fn new() -> Self {
        let mut v = Self::empty();
        for rule in REQUIRED_FIELDS {
            v.add_rule(Box::new(rule));
        }
        v
    }

    /// A validator with no rules.  Conversion still fails on packets that
    /// cannot be turned into a [`SensorPacket`].
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register an extra rule.  Rules run in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Check `raw` against every rule and convert it.
    ///
    /// # Errors
    ///
    /// The first [`ValidationError`] raised by a rule or by conversion.
    pub fn validate(&self, raw: &RawSensorPacket) -> Result<SensorPacket, ValidationError> {
        let value = raw.as_value();
        for rule in &self.rules {
            rule.check(value)?;
        }
        convert(value)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Conversion
// ────────────────────────────────────────────────────────────────────────────

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}

fn number(value: &Value, path: &'static str) -> Result<f64, ValidationError> {
    let field = lookup(value, path).ok_or_else(|| ValidationError::MissingField(path.into()))?;
    field.as_f64().ok_or_else(|| ValidationError::InvalidField {
        field: path.into(),
        reason: "expected a number".into(),
    })
}

fn numbers<const N: usize>(value: &Value, path: &'static str) -> Result<[f64; N], ValidationError> {
    let field = lookup(value, path).ok_or_else(|| ValidationError::MissingField(path.into()))?;
    let invalid = || ValidationError::InvalidField {
        field: path.into(),
        reason: format!("expected {N} numbers"),
    };
    let items = field.as_array().ok_or_else(invalid)?;
    let parsed: Vec<f64> = items.iter().map(Value::as_f64).collect::<Option<_>>().ok_or_else(invalid)?;
    parsed.try_into().map_err(|_| invalid())
}

fn object_type(value: &Value) -> Result<ObjectType, ValidationError> {
    const PATH: &str = "sonar.object_type";
    let field = lookup(value, PATH).ok_or_else(|| ValidationError::MissingField(PATH.into()))?;
    let label = field.as_str().ok_or_else(|| ValidationError::InvalidField {
        field: PATH.into(),
        reason: "expected a string".into(),
    })?;
    Ok(label.parse().unwrap_or_else(|_| {
        warn!(label, "unknown object type; mapping as empty");
        ObjectType::Empty
    }))
}

fn convert(value: &Value) -> Result<SensorPacket, ValidationError> {
    let [w, x, y, z] = numbers::<4>(value, "imu.quaternion")?;
    let [px, py, pz] = numbers::<3>(value, "sonar.point")?;
    let frame_id = lookup(value, "frame_id")
        .ok_or_else(|| ValidationError::MissingField("frame_id".into()))?
        .as_u64()
        .ok_or_else(|| ValidationError::InvalidField {
            field: "frame_id".into(),
            reason: "expected an unsigned integer".into(),
        })?;

    Ok(SensorPacket {
        timestamp: number(value, "timestamp")?,
        imu: ImuReading {
            quaternion: Quaternion::new(w, x, y, z),
        },
        sonar: SonarReading {
            point: Vec3::new(px, py, pz),
            distance: number(value, "sonar.distance")?,
            object_type: object_type(value)?,
        },
        thruster_speeds: numbers::<THRUSTER_COUNT>(value, "thruster_speeds")?,
        frame_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_json() -> Value {
        json!({
            "timestamp": 1700000000.25,
            "imu": { "quaternion": [1.0, 0.0, 0.0, 0.0] },
            "sonar": {
                "point": [1.0, 2.0, -3.0],
                "distance": 3.0,
                "object_type": "coral"
            },
            "thruster_speeds": [0.5, 0.5, 0.0, 0.0, 0.0, 0.0],
            "frame_id": 42
        })
    }

    fn without(path: &[&str]) -> RawSensorPacket {
        let mut v = valid_json();
        let (last, parents) = path.split_last().unwrap();
        let mut cursor = &mut v;
        for key in parents {
            cursor = cursor.get_mut(*key).unwrap();
        }
        cursor.as_object_mut().unwrap().remove(*last);
        RawSensorPacket::new(v)
    }

    #[test]
    fn valid_packet_is_converted() {
        let packet = SensorValidator::new()
            .validate(&RawSensorPacket::new(valid_json()))
            .unwrap();
        assert_eq!(packet.frame_id, 42);
        assert_eq!(packet.imu.quaternion, Quaternion::identity());
        assert_eq!(packet.sonar.point, Vec3::new(1.0, 2.0, -3.0));
        assert_eq!(packet.sonar.distance, 3.0);
        assert_eq!(packet.sonar.object_type, ObjectType::Coral);
        assert_eq!(packet.thruster_speeds, [0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn missing_sonar_distance_is_rejected() {
        let err = SensorValidator::new()
            .validate(&without(&["sonar", "distance"]))
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingField("sonar.distance".into()));
    }

    #[test]
    fn every_required_field_is_enforced() {
        let validator = SensorValidator::new();
        let cases: [&[&str]; 8] = [
            &["timestamp"],
            &["imu"],
            &["imu", "quaternion"],
            &["sonar"],
            &["sonar", "point"],
            &["sonar", "object_type"],
            &["thruster_speeds"],
            &["frame_id"],
        ];
        for path in cases {
            let result = validator.validate(&without(path));
            assert!(
                matches!(result, Err(ValidationError::MissingField(_))),
                "removing {path:?} should reject, got {result:?}"
            );
        }
    }

    #[test]
    fn wrong_array_length_is_invalid() {
        let mut v = valid_json();
        v["thruster_speeds"] = json!([0.1, 0.2]);
        let err = SensorValidator::new()
            .validate(&RawSensorPacket::new(v))
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidField { ref field, .. } if field == "thruster_speeds"
        ));
    }

    #[test]
    fn non_numeric_distance_is_invalid() {
        let mut v = valid_json();
        v["sonar"]["distance"] = json!("far");
        let err = SensorValidator::new()
            .validate(&RawSensorPacket::new(v))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { .. }));
    }

    #[test]
    fn negative_frame_id_is_invalid() {
        let mut v = valid_json();
        v["frame_id"] = json!(-1);
        assert!(SensorValidator::new().validate(&RawSensorPacket::new(v)).is_err());
    }

    #[test]
    fn unknown_object_type_becomes_empty() {
        let mut v = valid_json();
        v["sonar"]["object_type"] = json!("Kelp");
        let packet = SensorValidator::new()
            .validate(&RawSensorPacket::new(v))
            .unwrap();
        assert_eq!(packet.sonar.object_type, ObjectType::Empty);
    }

    #[test]
    fn custom_rule_runs_after_builtins() {
        struct PositiveDistance;
        impl Rule for PositiveDistance {
            fn name(&self) -> &str {
                "positive_distance"
            }
            fn check(&self, packet: &Value) -> Result<(), ValidationError> {
                match packet["sonar"]["distance"].as_f64() {
                    Some(d) if d > 0.0 => Ok(()),
                    _ => Err(ValidationError::InvalidField {
                        field: "sonar.distance".into(),
                        reason: "must be positive".into(),
                    }),
                }
            }
        }

        let mut validator = SensorValidator::new();
        validator.add_rule(Box::new(PositiveDistance));
        assert_eq!(validator.rule_count(), REQUIRED_FIELDS.len() + 1);

        let mut v = valid_json();
        v["sonar"]["distance"] = json!(-2.0);
        assert!(validator.validate(&RawSensorPacket::new(v)).is_err());
        assert!(validator.validate(&RawSensorPacket::new(valid_json())).is_ok());
    }

    #[test]
    fn empty_validator_still_refuses_unconvertible_packets() {
        let result = SensorValidator::empty().validate(&without(&["frame_id"]));
        assert_eq!(result, Err(ValidationError::MissingField("frame_id".into())));
    }
}
