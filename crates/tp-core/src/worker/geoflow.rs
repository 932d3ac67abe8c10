//! Geoflow LoD1.3 reconstruction worker.
//!
//! Unlike 3dfier, Geoflow takes its whole configuration on the command line:
//! `geoflow <flowchart> --KEY=VALUE ... <point cloud files>`.

use super::{ExecutionParams, TileContext, Worker};
use crate::output::OutputTarget;
use crate::runner::JobCommand;
use std::collections::BTreeMap;
use tp_common::schema::{quote_ident, quote_literal};
use tp_common::{Result, TileId};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct GeoflowWorker {
    extra_flags: BTreeMap<String, String>,
}

impl GeoflowWorker {
    pub const KEY: &'static str = "lod13";

    /// `extra_flags` are appended after the built-in flags, replacing any
    /// built-in flag of the same name.
    pub fn new(extra_flags: BTreeMap<String, String>) -> Self {
        GeoflowWorker { extra_flags }
    }

    /// Flag/value pairs for `tile`, in command-line order.
    pub fn flags(&self, tile: &TileId, ctx: &TileContext) -> Result<Vec<(String, String)>> {
        let features = &ctx.features;
        let mut flags = vec![
            ("TILE_ID".to_string(), tile.to_string()),
            (
                "INPUT_FOOTPRINT".to_string(),
                ctx.database.postgis_dsn(&features.schema, &features.table),
            ),
            (
                "INPUT_FOOTPRINT_WHERE".to_string(),
                format!("{}={}", quote_ident(&features.field.tile), quote_literal(tile.as_str())),
            ),
            ("BUILDING_ID".to_string(), features.field.uniqueid.clone()),
        ];
        match ctx.output()? {
            OutputTarget::Directory(dir) => flags.push((
                "OUTPUT_FILE".to_string(),
                dir.join_path(format!("{}.gpkg", tile)).display().to_string(),
            )),
            OutputTarget::Database(db) => flags.push(("OUTPUT_DB_CONNECTION".to_string(), db.dsn())),
        }
        for (key, value) in &self.extra_flags {
            match flags.iter_mut().find(|(k, _)| k == key) {
                Some(existing) => existing.1 = value.clone(),
                None => flags.push((key.clone(), value.clone())),
            }
        }
        Ok(flags)
    }
}

impl Worker for GeoflowWorker {
    fn name(&self) -> &'static str {
        Self::KEY
    }

    fn execute(&self, tile: &TileId, ctx: &TileContext, params: &ExecutionParams) -> Result<bool> {
        debug!(worker = Self::KEY, %tile, "running worker");
        let entries = ctx.datasets.entries(tile);
        if entries.is_empty() {
            debug!(%tile, "point cloud files not available for tile");
            return Ok(false);
        }
        let flags = self.flags(tile, ctx)?;
        let geoflow = params.executables.require("geoflow")?;
        let flowchart = params.executables.require("flowchart")?;

        let command = JobCommand::new(tile, geoflow.display().to_string())
            .arg(flowchart.display().to_string())
            .args(flags.into_iter().map(|(k, v)| format!("--{}={}", k, v)))
            .args(entries.iter().map(|e| e.path.display().to_string()));
        Ok(params.run(&command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{DatasetEntry, DatasetMapping};
    use crate::output::{DbOutput, DirOutput};
    use crate::runner::ExecutionMode;
    use crate::test_utils::{execution_params, tile_context, RecordingRunner};
    use crate::worker::Executables;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tp_common::{DbParams, Error};

    fn context(tmp: &TempDir) -> TileContext {
        let mut datasets = DatasetMapping::new();
        datasets.insert(
            TileId::from("37en1"),
            vec![
                DatasetEntry {
                    path: PathBuf::from("/data/a.laz"),
                    version: Some(3),
                },
                DatasetEntry {
                    path: PathBuf::from("/data/b.laz"),
                    version: Some(3),
                },
            ],
        );
        let dir = DirOutput::create(tmp.path().join("lod13")).unwrap();
        TileContext {
            datasets,
            ..tile_context(Some(OutputTarget::Directory(dir)))
        }
    }

    #[test]
    fn test_command_line() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let runner = Arc::new(RecordingRunner::succeeding());
        let params = execution_params(runner.clone(), tmp.path());
        assert!(GeoflowWorker::default()
            .execute(&TileId::from("37en1"), &ctx, &params)
            .unwrap());

        let cmd = &runner.commands()[0];
        assert_eq!(cmd.mode, ExecutionMode::Direct);
        assert_eq!(cmd.program, "/opt/geoflow/bin/geof");
        assert_eq!(cmd.args[0], "/opt/geoflow/lod13.json");
        assert_eq!(cmd.args[1], "--TILE_ID=37en1");
        assert_eq!(
            cmd.args[2],
            "--INPUT_FOOTPRINT=PG:dbname=bag host=localhost port=5432 user=tp \
             schemas=bagactueel tables=pandactueelbestaand"
        );
        assert_eq!(cmd.args[3], "--INPUT_FOOTPRINT_WHERE=\"tile_id\"='37en1'");
        assert_eq!(cmd.args[4], "--BUILDING_ID=identificatie");
        assert!(cmd.args[5].starts_with("--OUTPUT_FILE="));
        assert!(cmd.args[5].ends_with("lod13/37en1.gpkg"));
        assert_eq!(&cmd.args[6..], &["/data/a.laz", "/data/b.laz"]);
        // no configuration file for this worker
        assert!(runner.captured_configs().is_empty());
    }

    #[test]
    fn test_extra_flags_override_and_append() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let mut extra = BTreeMap::new();
        extra.insert("BUILDING_ID".to_string(), "gid".to_string());
        extra.insert("STOP_AT".to_string(), "3".to_string());
        let flags = GeoflowWorker::new(extra).flags(&TileId::from("37en1"), &ctx).unwrap();
        assert!(flags.contains(&("BUILDING_ID".to_string(), "gid".to_string())));
        assert_eq!(flags.last().unwrap(), &("STOP_AT".to_string(), "3".to_string()));
        assert_eq!(flags.iter().filter(|(k, _)| k == "BUILDING_ID").count(), 1);
    }

    #[test]
    fn test_footprint_filter_escapes_tile() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let flags = GeoflowWorker::default().flags(&TileId::from("x' or '1'='1"), &ctx).unwrap();
        let filter = &flags.iter().find(|(k, _)| k == "INPUT_FOOTPRINT_WHERE").unwrap().1;
        assert_eq!(filter, "\"tile_id\"='x'' or ''1''=''1'");
    }

    #[test]
    fn test_database_output_flag() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&tmp);
        ctx.output = Some(OutputTarget::Database(DbOutput::new(
            DbParams::new("bag3d", "db", 5432, "tp"),
            Some("lod13".into()),
            Some("buildings".into()),
        )));
        let flags = GeoflowWorker::default().flags(&TileId::from("37en1"), &ctx).unwrap();
        assert!(flags.contains(&(
            "OUTPUT_DB_CONNECTION".to_string(),
            "PG:dbname=bag3d host=db port=5432 user=tp schemas=lod13 tables=buildings".to_string()
        )));
    }

    #[test]
    fn test_missing_flowchart_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let runner = Arc::new(RecordingRunner::succeeding());
        let params = execution_params(runner.clone(), tmp.path()).with_executables(Executables {
            geoflow: Some(PathBuf::from("/opt/geoflow/bin/geof")),
            ..Default::default()
        });
        let err = GeoflowWorker::default()
            .execute(&TileId::from("37en1"), &ctx, &params)
            .unwrap_err();
        assert!(matches!(err, Error::MissingExecutable { ref name } if name == "flowchart"));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_no_data_skips_runner() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let runner = Arc::new(RecordingRunner::succeeding());
        let params = execution_params(runner.clone(), tmp.path());
        assert!(!GeoflowWorker::default()
            .execute(&TileId::from("25gn1"), &ctx, &params)
            .unwrap());
        assert!(runner.commands().is_empty());
    }
}
