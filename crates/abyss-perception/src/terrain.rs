//! Terrain mapping: sonar echoes → deduplicated, bounded point cloud.
//!
//! [`TerrainMapper::integrate`] runs the whole pipeline for one echo:
//!
//! 1. reject non-finite range, orientation or position,
//! 2. project the echo into the world frame ([`sonar_point`]),
//! 3. drop it when it lies closer than the dedup tolerance to the last
//!    accepted point,
//! 4. append point and label to the [`TerrainMap`] together,
//! 5. evict the oldest entries beyond the point cap,
//! 6. append one row to the [`TerrainLog`], when one is attached.
//!
//! The map keeps points and labels in two parallel sequences and never lets
//! their lengths diverge: a mismatch detected after an append rolls the
//! append back and is reported as [`LinkError::Consistency`].
//!
//! A failed log write leaves the in-memory point in place; the log is a
//! mirror, not the source of truth.

use std::collections::VecDeque;
use std::path::Path;

use abyss_types::{LinkError, ObjectType, Quaternion, TerrainPoint, Vec3};
use tracing::{debug, error, warn};

use crate::terrain_log::TerrainLog;
use crate::transform::sonar_point;

pub const DEFAULT_DEDUP_TOLERANCE: f64 = 0.01;
pub const DEFAULT_MAX_POINTS: usize = 1_000_000;

// ────────────────────────────────────────────────────────────────────────────
// TerrainMap
// ────────────────────────────────────────────────────────────────────────────

/// Ordered point cloud with a parallel label sequence, capped at
/// `max_points` (oldest evicted first).
#[derive(Debug, Clone)]
pub struct TerrainMap {
    points: VecDeque<Vec3>,
    object_types: VecDeque<ObjectType>,
    max_points: usize,
}

impl TerrainMap {
    pub fn new(max_points: usize) -> Self {
        Self {
            points: VecDeque::new(),
            object_types: VecDeque::new(),
            max_points: max_points.max(1),
        }
    }

    /// Append `point`, then evict from the front while over capacity.
    ///
    /// # Errors
    ///
    /// [`LinkError::Consistency`] when the two sequences disagree in length
    /// after the append.  Both are truncated back to their last consistent
    /// length before returning.
    pub fn push(&mut self, point: TerrainPoint) -> Result<(), LinkError> {
        let before = self.points.len().min(self.object_types.len());
        self.points.push_back(point.position);
        self.object_types.push_back(point.object_type);

        if self.points.len() != self.object_types.len() {
            let (points, labels) = (self.points.len(), self.object_types.len());
            self.points.truncate(before);
            self.object_types.truncate(before);
            return Err(LinkError::Consistency(format!(
                "terrain sequences diverged ({points} points, {labels} labels); rolled back to {before}"
            )));
        }

        while self.points.len() > self.max_points {
            self.points.pop_front();
            self.object_types.pop_front();
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// True when both sequences have the same length.
    pub fn is_consistent(&self) -> bool {
        self.points.len() == self.object_types.len()
    }

    pub fn last(&self) -> Option<TerrainPoint> {
        Some(TerrainPoint {
            position: *self.points.back()?,
            object_type: *self.object_types.back()?,
        })
    }

    /// Points with their labels, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = TerrainPoint> + '_ {
        self.points
            .iter()
            .zip(&self.object_types)
            .map(|(&position, &object_type)| TerrainPoint {
                position,
                object_type,
            })
    }

    pub fn positions(&self) -> &VecDeque<Vec3> {
        &self.points
    }

    pub fn object_types(&self) -> &VecDeque<ObjectType> {
        &self.object_types
    }

    /// Count of points per label.
    pub fn histogram(&self) -> [(ObjectType, usize); 5] {
        ObjectType::ALL.map(|t| (t, self.object_types.iter().filter(|&&o| o == t).count()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TerrainMapper
// ────────────────────────────────────────────────────────────────────────────

/// Tunables of a [`TerrainMapper`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapperConfig {
    /// Points strictly closer than this to the previous accepted point are
    /// discarded.
    pub dedup_tolerance: f64,
    pub max_points: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance: DEFAULT_DEDUP_TOLERANCE,
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

/// Owns the [`TerrainMap`] and its optional on-disk mirror.
#[derive(Debug)]
pub struct TerrainMapper {
    map: TerrainMap,
    log: Option<TerrainLog>,
    config: MapperConfig,
    last_accepted: Option<Vec3>,
}

impl TerrainMapper {
    /// An in-memory mapper with no log.
    pub fn new(config: MapperConfig) -> Self {
        Self {
            map: TerrainMap::new(config.max_points),
            log: None,
            config,
            last_accepted: None,
        }
    }

    /// A mapper mirrored to the CSV log at `path`.  Existing rows are loaded
    /// first; the newest loaded point becomes the dedup reference.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] when the log cannot be opened.
    pub fn with_log(path: impl AsRef<Path>, config: MapperConfig) -> Result<Self, LinkError> {
        let (log, loaded) = TerrainLog::open(path, config.max_points)?;
        let mut mapper = Self::new(config);
        for point in loaded {
            mapper.map.push(point)?;
        }
        mapper.last_accepted = mapper.map.last().map(|p| p.position);
        mapper.log = Some(log);
        Ok(mapper)
    }

    /// Map one sonar echo taken at `position` with `orientation`.
    ///
    /// Returns the accepted point, or `None` when the echo was rejected as
    /// non-finite or as a duplicate.
    ///
    /// # Errors
    ///
    /// [`LinkError::Consistency`] from [`TerrainMap::push`].  Log write
    /// failures are logged, not returned.
    pub fn integrate(
        &mut self,
        position: Vec3,
        orientation: Quaternion,
        distance: f64,
        object_type: ObjectType,
    ) -> Result<Option<TerrainPoint>, LinkError> {
        if !distance.is_finite() || !orientation.is_finite() || !position.is_finite() {
            warn!(distance, ?orientation, ?position, "non-finite ranging input ignored");
            return Ok(None);
        }

        let world = sonar_point(position, orientation, distance);
        let tolerance = self.config.dedup_tolerance;
        if self.last_accepted.is_some_and(|last| last.distance(world) < tolerance) {
            debug!(?world, "duplicate terrain point dropped");
            return Ok(None);
        }

        let point = TerrainPoint {
            position: world,
            object_type,
        };
        self.map.push(point)?;
        self.last_accepted = Some(world);

        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.append(&point) {
                error!(error = %e, "terrain log append failed; point kept in memory");
            }
        }
        debug!(?world, %object_type, total = self.map.len(), "terrain point added");
        Ok(Some(point))
    }

    pub fn map(&self) -> &TerrainMap {
        &self.map
    }

    pub fn config(&self) -> MapperConfig {
        self.config
    }

    pub fn has_log(&self) -> bool {
        self.log.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mapper() -> TerrainMapper {
        TerrainMapper::new(MapperConfig::default())
    }

    fn at(position: Vec3, distance: f64) -> (Vec3, Quaternion, f64) {
        (position, Quaternion::identity(), distance)
    }

    #[test]
    fn echo_lands_below_the_vehicle() {
        let mut m = mapper();
        let (p, q, d) = at(Vec3::new(1.0, 2.0, 0.0), 3.0);
        let point = m.integrate(p, q, d, ObjectType::Rock).unwrap().unwrap();
        assert_eq!(point.position, Vec3::new(1.0, 2.0, -3.0));
        assert_eq!(point.object_type, ObjectType::Rock);
        assert_eq!(m.map().len(), 1);
    }

    #[test]
    fn near_duplicate_is_dropped() {
        let mut m = mapper();
        // (1.000, 2.000, -3.000) then (1.003, 2.002, -3.001).
        let first = m
            .integrate(Vec3::new(1.0, 2.0, 0.0), Quaternion::identity(), 3.0, ObjectType::Sand)
            .unwrap();
        let second = m
            .integrate(Vec3::new(1.003, 2.002, 0.0), Quaternion::identity(), 3.001, ObjectType::Sand)
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(m.map().len(), 1);
    }

    #[test]
    fn points_at_tolerance_are_kept() {
        let mut m = TerrainMapper::new(MapperConfig {
            dedup_tolerance: 0.5,
            ..MapperConfig::default()
        });
        m.integrate(Vec3::zero(), Quaternion::identity(), 1.0, ObjectType::Sand).unwrap();
        let kept = m
            .integrate(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity(), 1.0, ObjectType::Sand)
            .unwrap();
        assert!(kept.is_some());
    }

    #[test]
    fn dedup_compares_against_last_accepted_only() {
        let mut m = mapper();
        let q = Quaternion::identity();
        m.integrate(Vec3::zero(), q, 1.0, ObjectType::Reef).unwrap();
        m.integrate(Vec3::new(5.0, 0.0, 0.0), q, 1.0, ObjectType::Reef).unwrap();
        // Back at the first spot: far from the last accepted point, so kept.
        assert!(m.integrate(Vec3::zero(), q, 1.0, ObjectType::Reef).unwrap().is_some());
        assert_eq!(m.map().len(), 3);
    }

    #[test]
    fn non_finite_inputs_are_ignored() {
        let mut m = mapper();
        let q = Quaternion::identity();
        assert!(m.integrate(Vec3::zero(), q, f64::NAN, ObjectType::Sand).unwrap().is_none());
        assert!(
            m.integrate(Vec3::zero(), Quaternion::new(f64::INFINITY, 0.0, 0.0, 0.0), 1.0, ObjectType::Sand)
                .unwrap()
                .is_none()
        );
        assert!(m.map().is_empty());
    }

    #[test]
    fn oldest_points_are_evicted_past_cap() {
        let mut m = TerrainMapper::new(MapperConfig {
            max_points: 3,
            ..MapperConfig::default()
        });
        for i in 0..5 {
            let object_type = ObjectType::ALL[i];
            m.integrate(Vec3::new(i as f64, 0.0, 0.0), Quaternion::identity(), 1.0, object_type)
                .unwrap();
        }
        let xs: Vec<f64> = m.map().iter().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![2.0, 3.0, 4.0]);
        let labels: Vec<ObjectType> = m.map().object_types().iter().copied().collect();
        assert_eq!(labels, vec![ObjectType::Coral, ObjectType::Reef, ObjectType::Empty]);
    }

    #[test]
    fn lengths_stay_equal_across_mixed_operations() {
        let mut m = TerrainMapper::new(MapperConfig {
            max_points: 50,
            ..MapperConfig::default()
        });
        let q = Quaternion::identity();
        for i in 0..400u32 {
            let x = f64::from(i % 37) * 0.004;
            let d = if i % 11 == 0 { f64::NAN } else { 1.0 + f64::from(i % 5) };
            let _ = m.integrate(Vec3::new(x, 0.0, 0.0), q, d, ObjectType::ALL[(i % 5) as usize]);
            assert!(m.map().is_consistent());
            assert!(m.map().len() <= 50);
        }
    }

    #[test]
    fn diverged_sequences_are_rolled_back() {
        let mut map = TerrainMap::new(10);
        map.push(TerrainPoint {
            position: Vec3::zero(),
            object_type: ObjectType::Sand,
        })
        .unwrap();
        // Corrupt the label sequence directly.
        map.object_types.push_back(ObjectType::Rock);

        let err = map
            .push(TerrainPoint {
                position: Vec3::new(1.0, 0.0, 0.0),
                object_type: ObjectType::Coral,
            })
            .unwrap_err();
        assert!(matches!(err, LinkError::Consistency(_)));
        assert!(map.is_consistent());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn histogram_counts_labels() {
        let mut map = TerrainMap::new(10);
        for t in [ObjectType::Sand, ObjectType::Sand, ObjectType::Coral] {
            map.push(TerrainPoint {
                position: Vec3::zero(),
                object_type: t,
            })
            .unwrap();
        }
        let h = map.histogram();
        assert_eq!(h[0], (ObjectType::Sand, 2));
        assert_eq!(h[2], (ObjectType::Coral, 1));
        assert_eq!(h[4], (ObjectType::Empty, 0));
    }

    #[test]
    fn mapper_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terrain_map.csv");
        let q = Quaternion::identity();

        {
            let mut m = TerrainMapper::with_log(&path, MapperConfig::default()).unwrap();
            assert!(m.has_log());
            m.integrate(Vec3::new(0.0, 0.0, 0.0), q, 2.0, ObjectType::Rock).unwrap();
            m.integrate(Vec3::new(1.0, 0.0, 0.0), q, 2.0, ObjectType::Coral).unwrap();
        }

        let mut m = TerrainMapper::with_log(&path, MapperConfig::default()).unwrap();
        let loaded: Vec<TerrainPoint> = m.map().iter().collect();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].position, Vec3::new(1.0, 0.0, -2.0));
        assert_eq!(loaded[1].object_type, ObjectType::Coral);

        // The last loaded point is the dedup reference.
        let dup = m
            .integrate(Vec3::new(1.001, 0.0, 0.0), q, 2.0, ObjectType::Coral)
            .unwrap();
        assert!(dup.is_none());
    }
}
