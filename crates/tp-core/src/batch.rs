//! Running a worker over a set of tiles.
//!
//! [`prepare`] turns a validated [`RunConfig`] and a tile selection into the
//! resolved tiles and the shared [`TileContext`]; [`process_tiles`] then runs
//! the worker on each tile in order and collects the outcomes.
//! [`prepare_version_parts`] splits a run over two elevation versions into
//! separately written parts.

use crate::config::RunConfig;
use crate::datasets::{DatasetMatcher, FileIndex};
use crate::db::Database;
use crate::logging::generate_run_id;
use crate::output::{DirOutput, OutputTarget};
use crate::tiles::{ResolvedTileSet, TileSelection, TileSet, VersionFilter, VersionIndex};
use crate::worker::{ExecutionParams, TileContext, Worker};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tp_common::{Error, Result, TileId};
use tracing::{error, info, info_span, warn};

/// Outcome of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub worker: String,
    pub succeeded: Vec<TileId>,
    pub failed: Vec<TileId>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Output subdirectory and version filter of each part of a run over two
/// elevation versions.
pub const VERSION_PARTS: [(&str, VersionFilter); 3] = [
    ("AHN2", VersionFilter::Version(2)),
    ("AHN3", VersionFilter::Version(3)),
    ("AHN_border", VersionFilter::Border),
];

/// One part of a run split by elevation version.
#[derive(Debug, Clone)]
pub struct RunPart {
    pub name: String,
    pub tiles: ResolvedTileSet,
    pub ctx: TileContext,
}

/// Resolve the tiles of a run and match their elevation files.
///
/// `filter` narrows the selection by elevation version before matching.
pub fn prepare(
    config: &RunConfig,
    db: Arc<dyn Database>,
    selection: &TileSelection,
    filter: VersionFilter,
) -> Result<(ResolvedTileSet, TileContext)> {
    let tiles = TileSet::new(db.clone(), config.features_tiles.clone()).configure(selection)?;
    let tiles = narrow(config, &db, filter, &tiles)?;
    let ctx = context_for(config, db, &tiles, config.file_index()?, config.output_target()?)?;
    Ok((tiles, ctx))
}

/// Split a run into the [`VERSION_PARTS`], each writing to `<dir>/<part>`
/// below the configured output directory.
///
/// The selection is resolved once. A part without tiles is kept, so every
/// part directory exists after preparation.
pub fn prepare_version_parts(
    config: &RunConfig,
    db: Arc<dyn Database>,
    selection: &TileSelection,
) -> Result<Vec<RunPart>> {
    let base = match config.output_target()? {
        OutputTarget::Directory(dir) => dir,
        OutputTarget::Database(_) => {
            return Err(Error::config("a run split by elevation version needs an output directory"))
        }
    };
    let selected = TileSet::new(db.clone(), config.features_tiles.clone()).configure(selection)?;
    let files = config.file_index()?;

    VERSION_PARTS
        .iter()
        .map(|&(name, filter)| -> Result<RunPart> {
            let tiles = narrow(config, &db, filter, &selected)?;
            let output = OutputTarget::Directory(DirOutput::create(base.join_path(name))?);
            let ctx = context_for(config, db.clone(), &tiles, files.clone(), output)?;
            Ok(RunPart {
                name: name.to_string(),
                tiles,
                ctx,
            })
        })
        .collect()
}

fn narrow(
    config: &RunConfig,
    db: &Arc<dyn Database>,
    filter: VersionFilter,
    tiles: &ResolvedTileSet,
) -> Result<ResolvedTileSet> {
    if filter == VersionFilter::All {
        return Ok(tiles.clone());
    }
    let narrowed = VersionIndex::new(db.clone(), config.elevation_tiles.clone()).apply(filter, tiles)?;
    info!(%filter, count = narrowed.len(), "applied version filter");
    Ok(narrowed)
}

fn context_for(
    config: &RunConfig,
    db: Arc<dyn Database>,
    tiles: &ResolvedTileSet,
    files: FileIndex,
    output: OutputTarget,
) -> Result<TileContext> {
    let matcher = DatasetMatcher::new(
        db,
        config.features_tiles.clone(),
        config.elevation_tiles.clone(),
        config.elevation.tiling,
        files,
    );
    Ok(TileContext {
        features: config.features.clone(),
        database: config.database.clone(),
        datasets: matcher.build_mapping(tiles)?,
        output: Some(output),
    })
}

/// Run `worker` on every tile, one after the other.
///
/// A failed tile does not stop the run. A configuration error does: it
/// would fail every remaining tile the same way.
pub fn process_tiles(
    worker: &dyn Worker,
    tiles: &ResolvedTileSet,
    ctx: &TileContext,
    params: &ExecutionParams,
) -> Result<RunReport> {
    let run_id = generate_run_id();
    let _span = info_span!("batch", run_id = %run_id, worker = worker.name()).entered();
    let started = Instant::now();
    info!(tiles = tiles.len(), "starting batch run");

    let mut report = RunReport {
        run_id,
        worker: worker.name().to_string(),
        succeeded: Vec::new(),
        failed: Vec::new(),
    };
    for tile in tiles {
        match worker.execute(tile, ctx, params) {
            Ok(true) => report.succeeded.push(tile.clone()),
            Ok(false) => {
                warn!(%tile, "tile failed");
                report.failed.push(tile.clone());
            }
            Err(e) => {
                error!(%tile, error = %e, "aborting batch run");
                return Err(e);
            }
        }
    }

    if report.all_succeeded() {
        info!(
            succeeded = report.succeeded.len(),
            elapsed_secs = started.elapsed().as_secs(),
            "batch run finished"
        );
    } else {
        let failed: Vec<&str> = report.failed.iter().map(TileId::as_str).collect();
        warn!(
            succeeded = report.succeeded.len(),
            failed = ?failed,
            elapsed_secs = started.elapsed().as_secs(),
            "batch run finished with failed tiles"
        );
    }
    Ok(report)
}

/// Run `worker` over each part in turn, one report per part.
pub fn process_parts(worker: &dyn Worker, parts: &[RunPart], params: &ExecutionParams) -> Result<Vec<RunReport>> {
    parts
        .iter()
        .map(|part| {
            let _span = info_span!("part", part = %part.name).entered();
            process_tiles(worker, &part.tiles, &part.ctx, params)
        })
        .collect()
}
