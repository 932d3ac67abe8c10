//! Minimal workers used to exercise a pipeline end to end.

use super::{ExecutionParams, TileContext, Worker};
use crate::output::OutputTarget;
use crate::runner::JobCommand;
use tp_common::{Error, Result, TileId};
use tracing::debug;

/// Runs the `template` executable with the tile id as its only argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateWorker;

impl TemplateWorker {
    pub const KEY: &'static str = "template";
}

impl Worker for TemplateWorker {
    fn name(&self) -> &'static str {
        Self::KEY
    }

    fn execute(&self, tile: &TileId, _ctx: &TileContext, params: &ExecutionParams) -> Result<bool> {
        debug!(worker = Self::KEY, %tile, "running worker");
        let exe = params.executables.require("template")?;
        let command = JobCommand::new(tile, exe.display().to_string()).arg(tile.as_str());
        Ok(params.run(&command))
    }
}

/// Runs the `template` executable against a database output:
/// `<template> <dsn> <tile>`, the DSN naming a per-tile table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateDbWorker;

impl TemplateDbWorker {
    pub const KEY: &'static str = "templatedb";
}

impl Worker for TemplateDbWorker {
    fn name(&self) -> &'static str {
        Self::KEY
    }

    fn execute(&self, tile: &TileId, ctx: &TileContext, params: &ExecutionParams) -> Result<bool> {
        debug!(worker = Self::KEY, %tile, "running worker");
        let dsn = match ctx.output()? {
            OutputTarget::Database(db) => db.with_table(tile.as_str()),
            OutputTarget::Directory(_) => {
                return Err(Error::config(format!(
                    "worker '{}' writes to a database, not a directory",
                    Self::KEY
                )))
            }
        };
        let exe = params.executables.require("template")?;
        let command = JobCommand::new(tile, exe.display().to_string())
            .arg(dsn)
            .arg(tile.as_str());
        Ok(params.run(&command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{DbOutput, DirOutput};
    use crate::test_utils::{execution_params, tile_context, RecordingRunner};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tp_common::DbParams;

    #[test]
    fn test_template_passes_tile() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::succeeding());
        let params = execution_params(runner.clone(), tmp.path());
        let ok = TemplateWorker
            .execute(&TileId::from("25gn1"), &tile_context(None), &params)
            .unwrap();
        assert!(ok);
        let commands = runner.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].args, vec!["25gn1"]);
    }

    #[test]
    fn test_template_reports_failure() {
        let tmp = TempDir::new().unwrap();
        let params = execution_params(Arc::new(RecordingRunner::failing()), tmp.path());
        let ok = TemplateWorker
            .execute(&TileId::from("25gn1"), &tile_context(None), &params)
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_templatedb_uses_per_tile_table() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::succeeding());
        let params = execution_params(runner.clone(), tmp.path());
        let out = DbOutput::new(DbParams::new("bag3d", "db", 5432, "tp"), Some("out".into()), None);
        let ctx = tile_context(Some(OutputTarget::Database(out)));
        assert!(TemplateDbWorker.execute(&TileId::from("25gn1"), &ctx, &params).unwrap());
        assert_eq!(
            runner.commands()[0].args,
            vec![
                "PG:dbname=bag3d host=db port=5432 user=tp schemas=out tables=out.25gn1".to_string(),
                "25gn1".to_string()
            ]
        );
    }

    #[test]
    fn test_templatedb_requires_database_output() {
        let tmp = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::succeeding());
        let params = execution_params(runner.clone(), tmp.path());

        let err = TemplateDbWorker
            .execute(&TileId::from("a"), &tile_context(None), &params)
            .unwrap_err();
        assert!(matches!(err, Error::OutputNotConfigured));

        let dir = DirOutput::create(tmp.path().join("out")).unwrap();
        let ctx = tile_context(Some(OutputTarget::Directory(dir)));
        let err = TemplateDbWorker.execute(&TileId::from("a"), &ctx, &params).unwrap_err();
        assert!(err.is_config());
        assert!(runner.commands().is_empty());
    }
}
