//! Append-only CSV mirror of the terrain map.
//!
//! ```text
//! x,y,depth,object_type
//! 1.5,-2,-7.25,rock
//! 1.6,-2,-7.3,sand
//! ```
//!
//! On open the whole file is parsed back into memory; afterwards every
//! accepted point is appended as one line and written straight through, so
//! a crash loses at most the line being written.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use abyss_types::{LinkError, ObjectType, TerrainPoint, Vec3};
use tracing::{debug, info, warn};

pub const HEADER: &str = "x,y,depth,object_type";

/// Handle to an open terrain log.
#[derive(Debug)]
pub struct TerrainLog {
    path: PathBuf,
    file: File,
    needs_newline: bool,
}

fn io_error(path: &Path, e: std::io::Error) -> LinkError {
    LinkError::Io(format!("{}: {e}", path.display()))
}

impl TerrainLog {
    /// Open (or create) the log at `path` and load its rows.
    ///
    /// A missing or empty file gets a header.  Malformed rows are skipped
    /// with a warning and unknown labels load as [`ObjectType::Empty`].
    /// Only the newest `max_points` rows are returned, oldest first.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] when the file cannot be read, created or opened for
    /// appending.
    pub fn open(
        path: impl AsRef<Path>,
        max_points: usize,
    ) -> Result<(Self, Vec<TerrainPoint>), LinkError> {
        let path = path.as_ref().to_path_buf();
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_error(&path, e)),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        let mut log = Self {
            path,
            file,
            needs_newline: !content.is_empty() && !content.ends_with('\n'),
        };

        if content.trim().is_empty() {
            log.write_line(HEADER)?;
            info!(path = %log.path.display(), "created terrain log");
            return Ok((log, Vec::new()));
        }

        let points = parse_rows(&content, max_points);
        info!(path = %log.path.display(), points = points.len(), "loaded terrain log");
        Ok((log, points))
    }

    /// Append one point as a CSV row.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] when the write fails.
    pub fn append(&mut self, point: &TerrainPoint) -> Result<(), LinkError> {
        self.write_line(&format_row(point))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        let mut buf = String::with_capacity(line.len() + 2);
        if self.needs_newline {
            buf.push('\n');
        }
        buf.push_str(line);
        buf.push('\n');
        self.file
            .write_all(buf.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| io_error(&self.path, e))?;
        self.needs_newline = false;
        Ok(())
    }
}

/// `x,y,depth,object_type`
pub fn format_row(point: &TerrainPoint) -> String {
    let Vec3 { x, y, z } = point.position;
    format!("{x},{y},{z},{}", point.object_type)
}

/// Parse one data row.  A missing label loads as [`ObjectType::Empty`].
pub fn parse_row(line: &str) -> Result<TerrainPoint, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if !(3..=4).contains(&fields.len()) {
        return Err(format!("expected 4 fields, got {}", fields.len()));
    }
    let coord = |i: usize, name: &str| {
        fields[i]
            .parse::<f64>()
            .map_err(|e| format!("{name}: {e}"))
    };
    let position = Vec3::new(coord(0, "x")?, coord(1, "y")?, coord(2, "depth")?);
    if !position.is_finite() {
        return Err("non-finite coordinate".to_string());
    }
    let object_type = match fields.get(3) {
        Some(label) => label.parse().unwrap_or_else(|_| {
            debug!(label, "unknown object type in terrain log");
            ObjectType::Empty
        }),
        None => ObjectType::Empty,
    };
    Ok(TerrainPoint {
        position,
        object_type,
    })
}

fn parse_rows(content: &str, max_points: usize) -> Vec<TerrainPoint> {
    let mut points = VecDeque::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line == HEADER {
            continue;
        }
        match parse_row(line) {
            Ok(p) => {
                points.push_back(p);
                if points.len() > max_points {
                    points.pop_front();
                }
            }
            Err(error) => warn!(line = n + 1, %error, "skipping malformed terrain log row"),
        }
    }
    points.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn point(x: f64, y: f64, z: f64, t: ObjectType) -> TerrainPoint {
        TerrainPoint {
            position: Vec3::new(x, y, z),
            object_type: t,
        }
    }

    #[test]
    fn missing_file_is_created_with_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("terrain_map.csv");

        let (_log, points) = TerrainLog::open(&path, 100).unwrap();

        assert!(points.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{HEADER}\n"));
    }

    #[test]
    fn empty_file_gets_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "").unwrap();

        TerrainLog::open(&path, 100).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("{HEADER}\n"));
    }

    #[test]
    fn written_points_reload_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        let written: Vec<TerrainPoint> = (0..25i32)
            .map(|i| {
                let f = f64::from(i);
                point(f * 0.1, -f / 3.0, -7.0 - f * 0.013, ObjectType::ALL[i as usize % 5])
            })
            .collect();

        {
            let (mut log, _) = TerrainLog::open(&path, 1_000).unwrap();
            for p in &written {
                log.append(p).unwrap();
            }
        }

        let (_, loaded) = TerrainLog::open(&path, 1_000).unwrap();
        assert_eq!(loaded, written);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(
            &path,
            "x,y,depth,object_type\n1,2,3,rock\nnot,a,row,sand\n4,5\n\n6,7,8,kelp\n9,10,11\n",
        )
        .unwrap();

        let (_, loaded) = TerrainLog::open(&path, 100).unwrap();
        assert_eq!(
            loaded,
            vec![
                point(1.0, 2.0, 3.0, ObjectType::Rock),
                point(6.0, 7.0, 8.0, ObjectType::Empty),
                point(9.0, 10.0, 11.0, ObjectType::Empty),
            ]
        );
    }

    #[test]
    fn reload_keeps_newest_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        {
            let (mut log, _) = TerrainLog::open(&path, 100).unwrap();
            for i in 0..10i32 {
                log.append(&point(f64::from(i), 0.0, 0.0, ObjectType::Sand)).unwrap();
            }
        }
        let (_, loaded) = TerrainLog::open(&path, 3).unwrap();
        let xs: Vec<f64> = loaded.iter().map(|p| p.position.x).collect();
        assert_eq!(xs, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn missing_trailing_newline_does_not_merge_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "x,y,depth,object_type\n1,2,3,reef").unwrap();

        {
            let (mut log, loaded) = TerrainLog::open(&path, 100).unwrap();
            assert_eq!(loaded.len(), 1);
            log.append(&point(4.0, 5.0, 6.0, ObjectType::Coral)).unwrap();
        }

        let (_, loaded) = TerrainLog::open(&path, 100).unwrap();
        assert_eq!(
            loaded,
            vec![
                point(1.0, 2.0, 3.0, ObjectType::Reef),
                point(4.0, 5.0, 6.0, ObjectType::Coral),
            ]
        );
    }

    #[test]
    fn row_format_matches_header_order() {
        let row = format_row(&point(1.5, -2.0, -7.25, ObjectType::Rock));
        assert_eq!(row, "1.5,-2,-7.25,rock");
        assert_eq!(parse_row(&row).unwrap(), point(1.5, -2.0, -7.25, ObjectType::Rock));
    }
}
