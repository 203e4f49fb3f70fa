//! Operator-side command sources: manual presets and the auto-route
//! follower.
//!
//! # Channel map
//!
//! | Channel | Axis |
//! |---|---|
//! | 0 | surge (x) |
//! | 1 | strafe (y) |
//! | 4 | vertical (z) |
//! | 2, 3, 5 | not used for translation |
//!
//! Manual presets drive channel pairs (0/1 for the horizontal moves, 4/5 for
//! the vertical ones) while the route follower writes a velocity vector into
//! channels 0, 1 and 4 only, matching what the position estimator reads back.

use std::str::FromStr;

use abyss_perception::estimator::{STRAFE_CHANNEL, SURGE_CHANNEL, VERTICAL_CHANNEL};
use abyss_types::{THRUSTER_COUNT, ThrusterCommand, ThrusterSpeeds, Vec3};
use thiserror::Error;
use tracing::{debug, info};

/// Default cruise speed along the route.
pub const DEFAULT_MAX_SPEED: f64 = 0.5;
/// Default distance at which a waypoint counts as reached.
pub const DEFAULT_REACH_TOLERANCE: f64 = 0.1;

const PRESET_SPEED: f64 = 0.5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NavigationError {
    #[error("invalid waypoint '{0}': expected x,y,z")]
    InvalidWaypoint(String),

    #[error("unknown manual input '{0}'")]
    UnknownInput(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Manual presets
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualInput {
    Forward,
    Backward,
    Left,
    Right,
    Ascend,
    Descend,
    Stop,
}

impl ManualInput {
    pub fn speeds(self) -> ThrusterSpeeds {
        let mut speeds = [0.0; THRUSTER_COUNT];
        let (a, b, pair) = match self {
            ManualInput::Forward => (PRESET_SPEED, PRESET_SPEED, (0, 1)),
            ManualInput::Backward => (-PRESET_SPEED, -PRESET_SPEED, (0, 1)),
            ManualInput::Left => (-PRESET_SPEED, PRESET_SPEED, (0, 1)),
            ManualInput::Right => (PRESET_SPEED, -PRESET_SPEED, (0, 1)),
            ManualInput::Ascend => (PRESET_SPEED, PRESET_SPEED, (4, 5)),
            ManualInput::Descend => (-PRESET_SPEED, -PRESET_SPEED, (4, 5)),
            ManualInput::Stop => return speeds,
        };
        speeds[pair.0] = a;
        speeds[pair.1] = b;
        speeds
    }

    pub fn command(self) -> ThrusterCommand {
        ThrusterCommand::new(self.speeds())
    }

    /// Single-key bindings: `w a s d` move, `q`/`e` ascend/descend, `x` stops.
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'w' => Some(ManualInput::Forward),
            's' => Some(ManualInput::Backward),
            'a' => Some(ManualInput::Left),
            'd' => Some(ManualInput::Right),
            'q' => Some(ManualInput::Ascend),
            'e' => Some(ManualInput::Descend),
            'x' => Some(ManualInput::Stop),
            _ => None,
        }
    }
}

impl FromStr for ManualInput {
    type Err = NavigationError;

    /// Accepts a single key or the lowercase variant name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some(input) = Self::from_key(c) {
                return Ok(input);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "forward" => Ok(ManualInput::Forward),
            "backward" => Ok(ManualInput::Backward),
            "left" => Ok(ManualInput::Left),
            "right" => Ok(ManualInput::Right),
            "ascend" | "up" => Ok(ManualInput::Ascend),
            "descend" | "down" => Ok(ManualInput::Descend),
            "stop" => Ok(ManualInput::Stop),
            _ => Err(NavigationError::UnknownInput(trimmed.to_string())),
        }
    }
}

/// Parse `"x,y,z"` (whitespace around components allowed).
///
/// # Errors
///
/// [`NavigationError::InvalidWaypoint`] unless there are exactly three
/// finite numbers.
pub fn parse_waypoint(text: &str) -> Result<Vec3, NavigationError> {
    let invalid = || NavigationError::InvalidWaypoint(text.trim().to_string());
    let parts = text
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    let [x, y, z] = parts[..] else {
        return Err(invalid());
    };
    let point = Vec3::new(x, y, z);
    if point.is_finite() {
        Ok(point)
    } else {
        Err(invalid())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Route follower
// ─────────────────────────────────────────────────────────────────────────────

/// Loops over an ordered list of waypoints, emitting one velocity command
/// per call.
#[derive(Debug, Clone)]
pub struct RouteFollower {
    waypoints: Vec<Vec3>,
    index: usize,
    max_speed: f64,
    reach_tolerance: f64,
}

impl Default for RouteFollower {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SPEED, DEFAULT_REACH_TOLERANCE)
    }
}

impl RouteFollower {
    pub fn new(max_speed: f64, reach_tolerance: f64) -> Self {
        Self {
            waypoints: Vec::new(),
            index: 0,
            max_speed,
            reach_tolerance,
        }
    }

    pub fn add_waypoint(&mut self, point: Vec3) {
        info!(x = point.x, y = point.y, z = point.z, "waypoint added");
        self.waypoints.push(point);
    }

    /// Drop every waypoint and restart from the first one added next.
    pub fn clear(&mut self) {
        self.waypoints.clear();
        self.index = 0;
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn waypoints(&self) -> &[Vec3] {
        &self.waypoints
    }

    /// Index of the waypoint currently being approached.
    pub fn current_index(&self) -> usize {
        self.index
    }

    /// Command for the vehicle at `position`.
    ///
    /// An empty route yields a stop command.  Reaching the current target
    /// advances to the next waypoint (wrapping after the last) and yields a
    /// stop command for this call.
    pub fn next_command(&mut self, position: Vec3) -> ThrusterCommand {
        if self.waypoints.is_empty() {
            return ThrusterCommand::stop();
        }
        if self.index >= self.waypoints.len() {
            self.index = 0;
        }

        let target = self.waypoints[self.index];
        let error = target - position;
        let distance = error.norm();

        if !distance.is_finite() || distance < self.reach_tolerance {
            debug!(index = self.index, "waypoint reached");
            self.index += 1;
            return ThrusterCommand::stop();
        }

        let velocity = error * (self.max_speed / distance);
        let mut speeds = [0.0; THRUSTER_COUNT];
        speeds[SURGE_CHANNEL] = velocity.x;
        speeds[STRAFE_CHANNEL] = velocity.y;
        speeds[VERTICAL_CHANNEL] = velocity.z;
        ThrusterCommand::new(speeds)
    }
}
