//! Test utilities for tp-core.
//!
//! - [`InMemoryTileIndex`]: a [`Database`] holding rectangular tile
//!   footprints, answering the queries the engine issues
//! - [`RecordingRunner`]: a [`CommandRunner`] that records commands and
//!   never spawns
//! - Fixture helpers

use crate::datasets::DatasetMapping;
use crate::db::{Database, QueryParam, Row, SqlValue};
use crate::output::OutputTarget;
use crate::runner::{CommandRunner, JobCommand, Monitor, RunnerError};
use crate::tiles::extent::{Extent, Polygon};
use crate::worker::{ExecutionParams, Executables, TileContext};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tp_common::{DbParams, Error, FeatureSchema, Result, TileId, TileIndexSchema};

// ============================================================================
// Fixtures
// ============================================================================

/// Fixture directory relative to crate root.
pub const FIXTURES_DIR: &str = "tests/fixtures";

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(FIXTURES_DIR).join(name)
}

pub fn load_fixture(name: &str) -> std::io::Result<String> {
    std::fs::read_to_string(fixture_path(name))
}

/// Create a temporary directory that is automatically cleaned up.
#[cfg(feature = "test-tempdir")]
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

pub fn features_schema() -> FeatureSchema {
    FeatureSchema::new(
        "bagactueel",
        "pandactueelbestaand",
        "gid",
        "geovlak",
        "tile_id",
        "identificatie",
    )
}

pub fn features_index() -> TileIndexSchema {
    TileIndexSchema::new("tile_index", "bag_tiles", "id", "geom", "unit")
}

pub fn elevation_index() -> TileIndexSchema {
    TileIndexSchema::new("tile_index", "ahn_tiles", "id", "geom", "unit")
        .with_version_field("ahn_version")
        .with_borders("border_tiles")
}

/// A context with no dataset entries.
pub fn tile_context(output: Option<OutputTarget>) -> TileContext {
    TileContext {
        features: features_schema(),
        database: DbParams::new("bag", "localhost", 5432, "tp"),
        datasets: DatasetMapping::new(),
        output,
    }
}

/// Every executable configured under `/opt`.
pub fn executables() -> Executables {
    Executables {
        threedfier: Some(PathBuf::from("/opt/3dfier/3dfier")),
        geoflow: Some(PathBuf::from("/opt/geoflow/bin/geof")),
        flowchart: Some(PathBuf::from("/opt/geoflow/lod13.json")),
        template: Some(PathBuf::from("/opt/tp/template.sh")),
    }
}

pub fn execution_params(runner: Arc<dyn CommandRunner>, work_dir: &Path) -> ExecutionParams {
    ExecutionParams::new(runner, work_dir).with_executables(executables())
}

// ============================================================================
// In-memory tile index
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Footprint {
    tile: String,
    /// `(min_x, min_y, max_x, max_y)`
    rect: (f64, f64, f64, f64),
    version: Option<u32>,
}

/// Tile index tables held in memory.
///
/// Footprints are axis-aligned rectangles. Queries are recognised by shape,
/// spatial predicates are evaluated exactly (touching counts as
/// intersecting, as in PostGIS). Every query is recorded.
#[derive(Debug, Default)]
pub struct InMemoryTileIndex {
    tables: HashMap<String, Vec<Footprint>>,
    queries: Mutex<Vec<(String, Vec<QueryParam>)>>,
}

impl InMemoryTileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tile(
        mut self,
        index: &TileIndexSchema,
        tile: &str,
        rect: (f64, f64, f64, f64),
        version: Option<u32>,
    ) -> Self {
        self.tables
            .entry(index.qualified_table())
            .or_default()
            .push(Footprint {
                tile: tile.to_string(),
                rect,
                version,
            });
        self
    }

    /// A `cols` x `rows` grid of square tiles of `size` starting at the
    /// origin. Tile ids are `row * cols + col + 1`, rows counted upwards.
    pub fn with_grid(self, index: &TileIndexSchema, cols: u32, rows: u32, size: f64, version: Option<u32>) -> Self {
        self.with_named_grid(index, "", cols, rows, size, version)
    }

    /// Same as [`with_grid`](Self::with_grid) with ids `<prefix><n>`.
    pub fn with_named_grid(
        mut self,
        index: &TileIndexSchema,
        prefix: &str,
        cols: u32,
        rows: u32,
        size: f64,
        version: Option<u32>,
    ) -> Self {
        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = (f64::from(col) * size, f64::from(row) * size);
                let id = format!("{}{}", prefix, row * cols + col + 1);
                self = self.with_tile(index, &id, (x, y, x + size, y + size), version);
            }
        }
        self
    }

    pub fn with_border_tiles(mut self, index: &TileIndexSchema, tiles: &[&str]) -> Self {
        if let Some(borders) = index.qualified_borders() {
            let table = self.tables.entry(borders).or_default();
            for tile in tiles {
                table.push(Footprint {
                    tile: tile.to_string(),
                    rect: (0.0, 0.0, 0.0, 0.0),
                    version: None,
                });
            }
        }
        self
    }

    /// SQL of every query received, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    fn table(&self, name: &str) -> Result<&[Footprint]> {
        self.tables
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Query(format!("relation {} does not exist", name)))
    }

    fn text_param(params: &[QueryParam]) -> Result<&str> {
        match params.first() {
            Some(QueryParam::Text(s)) => Ok(s),
            other => Err(Error::Query(format!("expected a text parameter, got {:?}", other))),
        }
    }
}

fn table_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    sql.split(keyword).nth(1)?.split_whitespace().next()
}

fn tile_value(tile: &str) -> SqlValue {
    SqlValue::Text(tile.to_string())
}

fn version_value(version: Option<u32>) -> SqlValue {
    version.map_or(SqlValue::Null, |v| SqlValue::Int(i64::from(v)))
}

fn distinct(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = Vec::new();
    for row in rows {
        if !seen.contains(&row) {
            seen.push(row);
        }
    }
    seen
}

impl Database for InMemoryTileIndex {
    fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>> {
        self.queries
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));

        let table_name = table_after(sql, "FROM ").ok_or_else(|| Error::Query(format!("no table in {}", sql)))?;
        let table = self.table(table_name)?;
        let with_version = !sql.contains(", NULL FROM");

        if sql.contains(" JOIN ") {
            let features_name = table_after(sql, " JOIN ").unwrap_or_default();
            let tile = Self::text_param(params)?;
            let features: Vec<_> = self.table(features_name)?.iter().filter(|f| f.tile == tile).collect();
            let rows = table
                .iter()
                .filter(|e| features.iter().any(|f| rects_intersect(e.rect, f.rect)))
                .map(|e| vec![tile_value(&e.tile), version_value(e.version.filter(|_| with_version))])
                .collect();
            return Ok(distinct(rows));
        }
        if sql.contains("ST_Intersects") {
            let extent = match params.first() {
                Some(QueryParam::Geometry(extent)) => extent,
                other => return Err(Error::Query(format!("expected a geometry parameter, got {:?}", other))),
            };
            let rows = table
                .iter()
                .filter(|f| extent_intersects_rect(extent, f.rect))
                .map(|f| vec![tile_value(&f.tile)])
                .collect();
            return Ok(distinct(rows));
        }
        if sql.contains("= ANY($1)") {
            let ids = match params.first() {
                Some(QueryParam::TextArray(ids)) => ids,
                other => return Err(Error::Query(format!("expected a text array, got {:?}", other))),
            };
            let rows = table
                .iter()
                .filter(|f| ids.contains(&f.tile))
                .map(|f| vec![tile_value(&f.tile)])
                .collect();
            return Ok(distinct(rows));
        }
        if sql.contains("IS NOT NULL") {
            let with_versions = table.iter().filter(|f| f.version.is_some());
            if sql.starts_with("SELECT DISTINCT") {
                return Ok(distinct(with_versions.map(|f| vec![version_value(f.version)]).collect()));
            }
            return Ok(with_versions
                .map(|f| vec![version_value(f.version), tile_value(&f.tile)])
                .collect());
        }
        if sql.contains("= $1") {
            let tile = Self::text_param(params)?;
            return Ok(table
                .iter()
                .filter(|f| f.tile == tile)
                .map(|f| vec![tile_value(&f.tile), version_value(f.version.filter(|_| with_version))])
                .collect());
        }
        Ok(distinct(table.iter().map(|f| vec![tile_value(&f.tile)]).collect()))
    }
}

// ============================================================================
// Geometry predicates
// ============================================================================

fn rects_intersect(a: (f64, f64, f64, f64), b: (f64, f64, f64, f64)) -> bool {
    a.0 <= b.2 && b.0 <= a.2 && a.1 <= b.3 && b.1 <= a.3
}

fn extent_intersects_rect(extent: &Extent, rect: (f64, f64, f64, f64)) -> bool {
    extent.polygons().into_iter().any(|p| polygon_intersects_rect(p, rect))
}

fn polygon_intersects_rect(polygon: &Polygon, rect: (f64, f64, f64, f64)) -> bool {
    let (x0, y0, x1, y1) = rect;
    let corners = [[x0, y0], [x1, y0], [x1, y1], [x0, y1]];
    let rect_edges: Vec<([f64; 2], [f64; 2])> = (0..4).map(|i| (corners[i], corners[(i + 1) % 4])).collect();

    let edge_crossing = polygon.iter().any(|ring| {
        ring.windows(2)
            .any(|w| rect_edges.iter().any(|(a, b)| segments_intersect(w[0], w[1], *a, *b)))
    });
    if edge_crossing {
        return true;
    }
    // No boundary contact: either one contains the other or they are apart.
    let vertex_in_rect = polygon
        .first()
        .and_then(|exterior| exterior.first())
        .is_some_and(|[x, y]| (x0..=x1).contains(x) && (y0..=y1).contains(y));
    vertex_in_rect || point_in_polygon(corners[0], polygon)
}

fn point_in_polygon(point: [f64; 2], polygon: &Polygon) -> bool {
    let mut rings = polygon.iter();
    let Some(exterior) = rings.next() else {
        return false;
    };
    point_in_ring(point, exterior) && !rings.any(|hole| point_in_ring(point, hole))
}

fn point_in_ring([px, py]: [f64; 2], ring: &[[f64; 2]]) -> bool {
    let mut inside = false;
    for w in ring.windows(2) {
        let ([xi, yi], [xj, yj]) = (w[0], w[1]);
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
    }
    inside
}

fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn on_segment(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> bool {
    p[0] >= a[0].min(b[0]) && p[0] <= a[0].max(b[0]) && p[1] >= a[1].min(b[1]) && p[1] <= a[1].max(b[1])
}

fn segments_intersect(p1: [f64; 2], p2: [f64; 2], q1: [f64; 2], q2: [f64; 2]) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)) && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0)) {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

// ============================================================================
// Recording runner
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeed,
    Fail,
    Error,
}

/// Records every command instead of running it.
///
/// Also captures the content of every `.yml` argument at the moment the
/// command is "run", so tests can inspect job configurations that are
/// removed afterwards.
#[derive(Debug)]
pub struct RecordingRunner {
    outcome: Outcome,
    failing_tiles: BTreeSet<TileId>,
    commands: Mutex<Vec<JobCommand>>,
    configs: Mutex<Vec<String>>,
    monitored: Mutex<usize>,
}

impl RecordingRunner {
    fn with_outcome(outcome: Outcome) -> Self {
        RecordingRunner {
            outcome,
            failing_tiles: BTreeSet::new(),
            commands: Mutex::new(Vec::new()),
            configs: Mutex::new(Vec::new()),
            monitored: Mutex::new(0),
        }
    }

    /// Every job succeeds.
    pub fn succeeding() -> Self {
        Self::with_outcome(Outcome::Succeed)
    }

    /// Every job fails.
    pub fn failing() -> Self {
        Self::with_outcome(Outcome::Fail)
    }

    /// Every job cannot be started.
    pub fn erroring() -> Self {
        Self::with_outcome(Outcome::Error)
    }

    /// Jobs for `tiles` fail, the rest keep their outcome.
    pub fn failing_for(mut self, tiles: &[&str]) -> Self {
        self.failing_tiles = tiles.iter().map(|t| TileId::from(*t)).collect();
        self
    }

    pub fn commands(&self) -> Vec<JobCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn captured_configs(&self) -> Vec<String> {
        self.configs.lock().unwrap().clone()
    }

    /// Number of runs that received a monitor.
    pub fn monitored_runs(&self) -> usize {
        *self.monitored.lock().unwrap()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &JobCommand, monitor: Option<&Monitor>) -> std::result::Result<bool, RunnerError> {
        self.commands.lock().unwrap().push(command.clone());
        if monitor.is_some() {
            *self.monitored.lock().unwrap() += 1;
        }
        for arg in command.args.iter().filter(|a| a.ends_with(".yml")) {
            if let Ok(content) = std::fs::read_to_string(arg) {
                self.configs.lock().unwrap().push(content);
            }
        }
        match self.outcome {
            Outcome::Error => Err(RunnerError::SpawnFailed {
                command: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
            }),
            Outcome::Fail => Ok(false),
            Outcome::Succeed => Ok(!self.failing_tiles.contains(&command.tile)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_touching_counts() {
        assert!(segments_intersect([0.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0]));
        assert!(segments_intersect([0.0, 0.0], [2.0, 2.0], [0.0, 2.0], [2.0, 0.0]));
        assert!(!segments_intersect([0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]));
    }

    #[test]
    fn test_polygon_rect_predicates() {
        let tri = Extent::from_exterior(vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]], None).unwrap();
        // inside the triangle
        assert!(extent_intersects_rect(&tri, (1.0, 1.0, 2.0, 2.0)));
        // beyond the hypotenuse
        assert!(!extent_intersects_rect(&tri, (6.0, 6.0, 8.0, 8.0)));
        // containing the whole triangle
        assert!(extent_intersects_rect(&tri, (-5.0, -5.0, 20.0, 20.0)));
        // touching along an edge
        assert!(extent_intersects_rect(&tri, (-2.0, 0.0, 0.0, 2.0)));
    }

    #[test]
    fn test_grid_ids() {
        let index = features_index();
        let db = InMemoryTileIndex::new().with_grid(&index, 2, 2, 10.0, None);
        let rows = db
            .query(&format!("SELECT DISTINCT \"unit\" FROM {}", index.qualified_table()), &[])
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![tile_value("1"), tile_value("2"), tile_value("3"), tile_value("4")]);
        assert_eq!(db.query_count(), 1);
    }

    #[test]
    fn test_unknown_table() {
        let db = InMemoryTileIndex::new();
        assert!(matches!(db.query("SELECT DISTINCT \"unit\" FROM \"x\".\"y\"", &[]), Err(Error::Query(_))));
    }
}
