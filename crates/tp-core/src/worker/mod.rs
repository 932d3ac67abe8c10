//! Per-tile workers.
//!
//! A worker turns one tile into one external job: it checks that the tile
//! has input data, builds the job's configuration (a YAML document or a list
//! of command-line flags), picks the output destination, and hands the
//! command to the injected [`CommandRunner`].
//!
//! Per tile:
//!
//! ```text
//! PENDING -> SKIPPED_NO_DATA
//!         -> CONFIGURED -> EXECUTING -> SUCCEEDED | FAILED
//! ```
//!
//! Job configuration files are removed when leaving EXECUTING, whatever the
//! outcome. Workers never retry.

pub mod artifact;
pub mod geoflow;
pub mod registry;
pub mod template;
pub mod threedfier;

pub use artifact::ScopedArtifact;
pub use registry::{WorkerConstructor, WorkerRegistry};

use crate::datasets::DatasetMapping;
use crate::output::OutputTarget;
use crate::runner::{CommandRunner, JobCommand, Monitor};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tp_common::{DbParams, Error, FeatureSchema, Result, TileId};
use tracing::error;

/// A strategy for processing a single tile.
pub trait Worker: Send + Sync {
    /// Registry key of this worker.
    fn name(&self) -> &'static str;

    /// Process `tile`.
    ///
    /// `Ok(false)` covers every per-tile failure: missing input data, a
    /// failed or unstartable job. `Err` is reserved for configuration errors
    /// such as a missing output target or executable.
    fn execute(&self, tile: &TileId, ctx: &TileContext, params: &ExecutionParams) -> Result<bool>;
}

/// What the run knows about its tiles.
#[derive(Debug, Clone)]
pub struct TileContext {
    pub features: FeatureSchema,
    pub database: DbParams,
    pub datasets: DatasetMapping,
    pub output: Option<OutputTarget>,
}

impl TileContext {
    pub fn output(&self) -> Result<&OutputTarget> {
        self.output.as_ref().ok_or(Error::OutputNotConfigured)
    }
}

/// Paths of the external programs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Executables {
    pub threedfier: Option<PathBuf>,
    pub geoflow: Option<PathBuf>,
    /// Geoflow flowchart passed as the first argument to `geoflow`.
    pub flowchart: Option<PathBuf>,
    pub template: Option<PathBuf>,
}

impl Executables {
    /// The configured path for `name`, or a configuration error.
    pub fn require(&self, name: &str) -> Result<&Path> {
        let path = match name {
            "threedfier" => &self.threedfier,
            "geoflow" => &self.geoflow,
            "flowchart" => &self.flowchart,
            "template" => &self.template,
            _ => &None,
        };
        path.as_deref().ok_or_else(|| Error::MissingExecutable {
            name: name.to_string(),
        })
    }
}

/// How jobs are executed.
#[derive(Clone)]
pub struct ExecutionParams {
    pub executables: Executables,
    pub runner: Arc<dyn CommandRunner>,
    pub monitor: Option<Monitor>,
    /// Directory for per-tile job configuration files.
    pub work_dir: PathBuf,
}

impl ExecutionParams {
    pub fn new(runner: Arc<dyn CommandRunner>, work_dir: impl Into<PathBuf>) -> Self {
        ExecutionParams {
            executables: Executables::default(),
            runner,
            monitor: None,
            work_dir: work_dir.into(),
        }
    }

    pub fn with_executables(mut self, executables: Executables) -> Self {
        self.executables = executables;
        self
    }

    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Run `command`, treating a runner error as a failed tile.
    pub fn run(&self, command: &JobCommand) -> bool {
        match self.runner.run(command, self.monitor.as_ref()) {
            Ok(success) => success,
            Err(e) => {
                error!(tile = %command.tile, program = %command.program, error = %e, "cannot run job");
                false
            }
        }
    }
}

/// Tuning knobs handed to worker constructors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerParams {
    /// Keep every n-th elevation point; 0 keeps all.
    pub thinning: u32,
    /// TIN simplification tolerance of the terrain variant, metres.
    pub simplification_tolerance: f64,
    /// Additional `--KEY=VALUE` flags for flag-based workers.
    pub flags: BTreeMap<String, String>,
}

impl Default for WorkerParams {
    fn default() -> Self {
        WorkerParams {
            thinning: 0,
            simplification_tolerance: 0.1,
            flags: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_executable() {
        let exes = Executables {
            threedfier: Some(PathBuf::from("/opt/3dfier/3dfier")),
            ..Default::default()
        };
        assert_eq!(exes.require("threedfier").unwrap(), Path::new("/opt/3dfier/3dfier"));
        let err = exes.require("geoflow").unwrap_err();
        assert_eq!(err.to_string(), "no executable configured for 'geoflow'");
        assert!(exes.require("unknown").is_err());
    }

    #[test]
    fn test_worker_params_yaml_defaults() {
        let params: WorkerParams = serde_yaml::from_str("flags: {STOP_AT: 3}").unwrap();
        assert_eq!(params.thinning, 0);
        assert_eq!(params.simplification_tolerance, 0.1);
        assert_eq!(params.flags["STOP_AT"], "3");
    }

    #[test]
    fn test_missing_output_is_config_error() {
        let ctx = TileContext {
            features: FeatureSchema::new("bag", "pand", "gid", "geovlak", "unit", "identificatie"),
            database: DbParams::new("bag", "localhost", 5432, "tp"),
            datasets: DatasetMapping::new(),
            output: None,
        };
        assert!(matches!(ctx.output(), Err(Error::OutputNotConfigured)));
    }
}
