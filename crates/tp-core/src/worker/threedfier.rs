//! 3dfier workers.
//!
//! Both variants write a YAML job configuration next to the other per-tile
//! artifacts, run 3dfier on it through a shell, and remove the file once the
//! job is over.

use super::{ExecutionParams, ScopedArtifact, TileContext, Worker};
use crate::datasets::DatasetEntry;
use crate::output::OutputTarget;
use crate::runner::{ExecutionMode, JobCommand};
use serde::Serialize;
use std::collections::BTreeSet;
use tp_common::{Error, Result, TileId};
use tracing::debug;

/// Roof point classes per set of elevation versions present in a tile.
const ROOF_CLASSES: &[(&[u32], &[u8])] = &[(&[2], &[1]), (&[3], &[6]), (&[2, 3], &[1, 6])];

const GROUND_CLASS: u8 = 2;

/// LAS classes that hold roof points for the given elevation versions.
/// `None` for combinations without a known classification.
pub fn roof_classes(versions: &BTreeSet<u32>) -> Option<Vec<u8>> {
    ROOF_CLASSES
        .iter()
        .find(|(set, _)| versions.iter().copied().eq(set.iter().copied()))
        .map(|(_, classes)| classes.to_vec())
}

#[derive(Debug, Serialize)]
pub struct JobConfig {
    pub input_polygons: Vec<InputPolygons>,
    pub lifting_options: LiftingOptions,
    pub input_elevation: Vec<InputElevation>,
    pub options: JobOptions,
}

#[derive(Debug, Serialize)]
pub struct InputPolygons {
    pub datasets: Vec<String>,
    pub uniqueid: String,
    pub lifting: Lifting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifting {
    Building,
    Terrain,
}

#[derive(Debug, Default, Serialize)]
pub struct LiftingOptions {
    #[serde(rename = "Building", skip_serializing_if = "Option::is_none")]
    pub building: Option<BuildingOptions>,
    #[serde(rename = "Terrain", skip_serializing_if = "Option::is_none")]
    pub terrain: Option<TerrainOptions>,
}

#[derive(Debug, Serialize)]
pub struct BuildingOptions {
    pub roof: HeightOptions,
    pub ground: HeightOptions,
}

#[derive(Debug, Serialize)]
pub struct HeightOptions {
    pub height: &'static str,
    #[serde(rename = "use_LAS_classes", skip_serializing_if = "Option::is_none")]
    pub use_las_classes: Option<Vec<u8>>,
}

#[derive(Debug, Serialize)]
pub struct TerrainOptions {
    pub simplification_tinsimp: f64,
    pub inner_buffer: f64,
    #[serde(rename = "use_LAS_classes")]
    pub use_las_classes: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct InputElevation {
    pub datasets: Vec<String>,
    #[serde(rename = "omit_LAS_classes")]
    pub omit_las_classes: Option<Vec<u8>>,
    pub thinning: u32,
}

#[derive(Debug, Serialize)]
pub struct JobOptions {
    pub building_radius_vertex_elevation: f64,
    pub radius_vertex_elevation: f64,
    pub threshold_jump_edges: f64,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            building_radius_vertex_elevation: 0.5,
            radius_vertex_elevation: 0.5,
            threshold_jump_edges: 0.5,
        }
    }
}

impl JobConfig {
    fn new(ctx: &TileContext, lifting: Lifting, lifting_options: LiftingOptions, entries: &[DatasetEntry], thinning: u32) -> Self {
        let features = &ctx.features;
        JobConfig {
            input_polygons: vec![InputPolygons {
                datasets: vec![ctx.database.postgis_dsn(&features.schema, &features.table)],
                uniqueid: features.field.uniqueid.clone(),
                lifting,
            }],
            lifting_options,
            input_elevation: vec![InputElevation {
                datasets: entries.iter().map(|e| e.path.display().to_string()).collect(),
                omit_las_classes: None,
                thinning,
            }],
            options: JobOptions::default(),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Shared execution path: config artifact, command, cleanup.
fn run_threedfier(
    worker: &'static str,
    tile: &TileId,
    params: &ExecutionParams,
    config: &JobConfig,
    output_args: Vec<String>,
) -> Result<bool> {
    let exe = params.executables.require("threedfier")?;
    let yaml = config.to_yaml()?;
    let artifact = ScopedArtifact::write(params.work_dir.join(format!("{}.yml", tile)), &yaml);
    let command = JobCommand::new(tile, exe.display().to_string())
        .arg(artifact.path().display().to_string())
        .args(output_args)
        .mode(ExecutionMode::Shell);
    debug!(worker, %tile, %command, "prepared job");
    Ok(params.run(&command))
}

/// Reconstructs buildings from footprints and point clouds.
#[derive(Debug, Clone, Default)]
pub struct ThreedfierWorker {
    thinning: u32,
}

impl ThreedfierWorker {
    pub const KEY: &'static str = "threedfier";

    pub fn new(thinning: u32) -> Self {
        ThreedfierWorker { thinning }
    }

    pub fn job_config(&self, tile: &TileId, ctx: &TileContext) -> JobConfig {
        let options = LiftingOptions {
            building: Some(BuildingOptions {
                roof: HeightOptions {
                    height: "percentile-95",
                    use_las_classes: roof_classes(&ctx.datasets.versions(tile)),
                },
                ground: HeightOptions {
                    height: "percentile-10",
                    use_las_classes: Some(vec![GROUND_CLASS]),
                },
            }),
            terrain: None,
        };
        JobConfig::new(ctx, Lifting::Building, options, ctx.datasets.entries(tile), self.thinning)
    }

    fn output_args(tile: &TileId, ctx: &TileContext) -> Result<Vec<String>> {
        Ok(match ctx.output()? {
            OutputTarget::Directory(dir) => vec![
                "--stat_RMSE".to_string(),
                "--CSV-BUILDINGS-MULTIPLE".to_string(),
                dir.join_path(format!("{}.csv", tile)).display().to_string(),
            ],
            OutputTarget::Database(db) => vec!["--stat_RMSE".to_string(), "--PostGIS".to_string(), db.dsn()],
        })
    }
}

impl Worker for ThreedfierWorker {
    fn name(&self) -> &'static str {
        Self::KEY
    }

    fn execute(&self, tile: &TileId, ctx: &TileContext, params: &ExecutionParams) -> Result<bool> {
        debug!(worker = Self::KEY, %tile, "running worker");
        if ctx.datasets.entries(tile).is_empty() {
            debug!(%tile, "point cloud files not available for tile");
            return Ok(false);
        }
        let output_args = Self::output_args(tile, ctx)?;
        run_threedfier(Self::KEY, tile, params, &self.job_config(tile, ctx), output_args)
    }
}

/// Builds a simplified terrain surface for the tile.
#[derive(Debug, Clone)]
pub struct ThreedfierTerrainWorker {
    thinning: u32,
    simplification_tolerance: f64,
}

impl ThreedfierTerrainWorker {
    pub const KEY: &'static str = "threedfier_terrain";

    pub fn new(thinning: u32, simplification_tolerance: f64) -> Self {
        ThreedfierTerrainWorker {
            thinning,
            simplification_tolerance,
        }
    }

    pub fn job_config(&self, tile: &TileId, ctx: &TileContext) -> JobConfig {
        let options = LiftingOptions {
            building: None,
            terrain: Some(TerrainOptions {
                simplification_tinsimp: self.simplification_tolerance,
                inner_buffer: 0.0,
                use_las_classes: vec![GROUND_CLASS],
            }),
        };
        JobConfig::new(ctx, Lifting::Terrain, options, ctx.datasets.entries(tile), self.thinning)
    }
}

impl Worker for ThreedfierTerrainWorker {
    fn name(&self) -> &'static str {
        Self::KEY
    }

    fn execute(&self, tile: &TileId, ctx: &TileContext, params: &ExecutionParams) -> Result<bool> {
        debug!(worker = Self::KEY, %tile, "running worker");
        if ctx.datasets.entries(tile).is_empty() {
            debug!(%tile, "point cloud files not available for tile");
            return Ok(false);
        }
        // OBJ is a file format; there is no database rendition of a terrain mesh
        let output_args = match ctx.output()? {
            OutputTarget::Directory(dir) => vec![
                "--OBJ".to_string(),
                dir.join_path(format!("{}.obj", tile)).display().to_string(),
            ],
            OutputTarget::Database(_) => {
                return Err(Error::config(format!(
                    "worker '{}' writes OBJ files and needs an output directory",
                    Self::KEY
                )))
            }
        };
        run_threedfier(Self::KEY, tile, params, &self.job_config(tile, ctx), output_args)
    }
}
