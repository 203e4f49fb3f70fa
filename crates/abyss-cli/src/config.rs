//! Configuration vault – reads/writes `~/.abyss/config.toml`.
//!
//! Every field has a serde default, so a partial file (or none at all) is
//! fine.  `ABYSS_*` environment variables override the file.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use abyss_perception::MapperConfig;
use abyss_runtime::{OperatorConfig, VehicleConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Persisted settings for both stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbyssConfig {
    // ── Operator ──────────────────────────────────────────────────────────
    pub operator_bind: SocketAddr,
    pub vehicle_addr: SocketAddr,
    pub tick_interval_ms: u64,
    pub recv_timeout_ms: u64,
    pub route_interval_ms: u64,
    pub estimator_dt: f64,
    pub dedup_tolerance: f64,
    pub max_terrain_points: usize,
    pub stale_frame_window: u64,
    /// CSV mirror of the terrain map.  Empty disables the log.
    pub terrain_log: String,
    pub route_max_speed: f64,
    pub route_reach_tolerance: f64,
    pub link_deadline_ms: u64,

    // ── Vehicle ───────────────────────────────────────────────────────────
    pub vehicle_bind: SocketAddr,
    pub operator_addr: SocketAddr,
    pub telemetry_period_ms: u64,
    pub chunk_size: usize,
}

impl Default for AbyssConfig {
    fn default() -> Self {
        let operator = OperatorConfig::default();
        let vehicle = VehicleConfig::default();
        Self {
            operator_bind: operator.bind,
            vehicle_addr: operator.vehicle_addr,
            tick_interval_ms: millis(operator.tick_interval),
            recv_timeout_ms: millis(operator.recv_timeout),
            route_interval_ms: millis(operator.route_interval),
            estimator_dt: operator.estimator_dt,
            dedup_tolerance: operator.mapper.dedup_tolerance,
            max_terrain_points: operator.mapper.max_points,
            stale_frame_window: operator.stale_frame_window,
            terrain_log: "terrain_map.csv".to_string(),
            route_max_speed: operator.route_max_speed,
            route_reach_tolerance: operator.route_reach_tolerance,
            link_deadline_ms: millis(operator.link_deadline),
            vehicle_bind: vehicle.bind,
            operator_addr: vehicle.operator_addr,
            telemetry_period_ms: millis(vehicle.telemetry_period),
            chunk_size: vehicle.chunk_size,
        }
    }
}

impl AbyssConfig {
    pub fn to_operator_config(&self) -> OperatorConfig {
        OperatorConfig {
            bind: self.operator_bind,
            vehicle_addr: self.vehicle_addr,
            tick_interval: interval(self.tick_interval_ms),
            recv_timeout: interval(self.recv_timeout_ms),
            route_interval: interval(self.route_interval_ms),
            estimator_dt: self.estimator_dt,
            mapper: MapperConfig {
                dedup_tolerance: self.dedup_tolerance,
                max_points: self.max_terrain_points.max(1),
            },
            stale_frame_window: self.stale_frame_window,
            terrain_log: (!self.terrain_log.trim().is_empty())
                .then(|| PathBuf::from(self.terrain_log.trim())),
            route_max_speed: self.route_max_speed,
            route_reach_tolerance: self.route_reach_tolerance,
            link_deadline: Duration::from_millis(self.link_deadline_ms),
        }
    }

    pub fn to_vehicle_config(&self) -> VehicleConfig {
        VehicleConfig {
            bind: self.vehicle_bind,
            operator_addr: self.operator_addr,
            telemetry_period: interval(self.telemetry_period_ms),
            recv_timeout: interval(self.recv_timeout_ms),
            chunk_size: self.chunk_size.max(1),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Timer periods must be non-zero.
fn interval(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.abyss/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".abyss").join("config.toml")
}

/// Load `path` with environment overrides applied.  Returns `None` if the
/// file does not exist.
pub fn load_from(path: &Path) -> Result<Option<AbyssConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// The configuration in effect: the file at `path` or, when absent, the
/// defaults, with environment overrides applied either way.
pub fn effective(path: &Path) -> Result<AbyssConfig, String> {
    Ok(load_from(path)?.unwrap_or_else(|| {
        let mut cfg = AbyssConfig::default();
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

pub(crate) fn parse(raw: &str) -> Result<AbyssConfig, String> {
    toml::from_str(raw).map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `ABYSS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ABYSS_OPERATOR_BIND` | `operator_bind` |
/// | `ABYSS_VEHICLE_ADDR` | `vehicle_addr` |
/// | `ABYSS_VEHICLE_BIND` | `vehicle_bind` |
/// | `ABYSS_OPERATOR_ADDR` | `operator_addr` |
/// | `ABYSS_TERRAIN_LOG` | `terrain_log` |
/// | `ABYSS_DEDUP_TOLERANCE` | `dedup_tolerance` |
///
/// Values that do not parse are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut AbyssConfig) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut AbyssConfig, lookup: impl Fn(&str) -> Option<String>) {
    override_parsed(&lookup, "ABYSS_OPERATOR_BIND", &mut cfg.operator_bind);
    override_parsed(&lookup, "ABYSS_VEHICLE_ADDR", &mut cfg.vehicle_addr);
    override_parsed(&lookup, "ABYSS_VEHICLE_BIND", &mut cfg.vehicle_bind);
    override_parsed(&lookup, "ABYSS_OPERATOR_ADDR", &mut cfg.operator_addr);
    if let Some(v) = lookup("ABYSS_TERRAIN_LOG") {
        cfg.terrain_log = v;
    }
    let mut tolerance = cfg.dedup_tolerance;
    override_parsed(&lookup, "ABYSS_DEDUP_TOLERANCE", &mut tolerance);
    if tolerance.is_finite() && tolerance >= 0.0 {
        cfg.dedup_tolerance = tolerance;
    } else {
        warn!(value = tolerance, "ignoring negative or non-finite ABYSS_DEDUP_TOLERANCE");
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable override"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Saving
// ─────────────────────────────────────────────────────────────────────────────

pub fn to_toml(cfg: &AbyssConfig) -> Result<String, String> {
    toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))
}

/// Write `cfg` to `path`, creating the parent directory.  On Unix the
/// directory is `0o700` and the file `0o600`.
pub fn save_to(cfg: &AbyssConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = to_toml(cfg)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
