//! Run configuration.
//!
//! One YAML document describes a batch run: where the tile indexes live, how
//! elevation files are found, where results go and which executables to
//! call. Loading parses and validates; the `*_target`/`*_index` helpers turn
//! the validated values into the runtime objects the engine works with.
//!
//! ```yaml
//! database: { dbname: bag, host: localhost, port: 5432, user: tp }
//! features_tiles:
//!   schema: tile_index
//!   table: bag_tiles
//!   field: { pk: id, geometry: geom, tile: unit }
//! features:
//!   schema: bagactueel
//!   table: pandactueelbestaand
//!   field: { pk: gid, geometry: geovlak, tile: unit, uniqueid: identificatie }
//! elevation_tiles:
//!   schema: tile_index
//!   table: ahn_index
//!   field: { pk: id, geometry: geom, tile: unit, version: ahn_version }
//! elevation:
//!   tiling: identical
//!   directories:
//!     - /data/ahn3: { file_pattern: "C_{tile}.LAZ", priority: 1 }
//! output:
//!   dir: /data/out
//! executables:
//!   threedfier: /opt/3dfier/3dfier
//! ```

use crate::datasets::{DirectoryPattern, FileIndex, TilingRelation};
use crate::logging::{self, LogConfig};
use crate::output::{DbOutput, DirOutput, OutputTarget};
use crate::runner::monitor::DEFAULT_INTERVAL;
use crate::runner::{CommandRunner, FileMonitorSink, Monitor, ProcessRunner};
use crate::worker::{ExecutionParams, Executables, WorkerParams};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tp_common::{DbParams, Error, FeatureSchema, Result, TileIndexSchema};
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub database: DbParams,
    pub features_tiles: TileIndexSchema,
    pub features: FeatureSchema,
    pub elevation_tiles: TileIndexSchema,
    #[serde(default)]
    pub elevation: ElevationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub executables: Executables,
    /// Resource monitoring is enabled by the presence of this section.
    #[serde(default)]
    pub monitor: Option<MonitorConfig>,
    #[serde(default)]
    pub worker: WorkerParams,
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ElevationConfig {
    #[serde(default)]
    pub tiling: TilingRelation,
    /// Each item maps one directory to its pattern.
    #[serde(default)]
    pub directories: Vec<BTreeMap<PathBuf, DirectoryPattern>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    pub dir: Option<PathBuf>,
    pub database: Option<DbOutputConfig>,
    /// Anything else is passed to the worker as a flag.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbOutputConfig {
    #[serde(flatten)]
    pub params: DbParams,
    pub schema: Option<String>,
    pub table: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    pub interval_secs: Option<u64>,
    /// Directory of the resource usage log. Defaults to the state directory.
    pub dir: Option<PathBuf>,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        self.interval_secs.map(Duration::from_secs).unwrap_or(DEFAULT_INTERVAL)
    }
}

impl RunConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading run configuration");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (dir, pattern) in self.directories() {
            if !dir.is_absolute() {
                return Err(Error::config(format!(
                    "elevation directory '{}' is not an absolute path",
                    dir.display()
                )));
            }
            pattern.regex()?;
        }
        match (&self.output.dir, &self.output.database) {
            (Some(_), Some(_)) => Err(Error::config("output must be either 'dir' or 'database', not both")),
            (None, None) => Err(Error::OutputNotConfigured),
            _ => Ok(()),
        }?;
        if self.timeout_secs == Some(0) {
            return Err(Error::config("timeout_secs must be positive"));
        }
        if self.monitor.as_ref().and_then(|m| m.interval_secs) == Some(0) {
            return Err(Error::config("monitor interval_secs must be positive"));
        }
        Ok(())
    }

    /// Elevation directories in configuration order.
    pub fn directories(&self) -> Vec<(PathBuf, DirectoryPattern)> {
        self.elevation
            .directories
            .iter()
            .flat_map(|item| item.iter().map(|(dir, pattern)| (dir.clone(), pattern.clone())))
            .collect()
    }

    pub fn file_index(&self) -> Result<FileIndex> {
        FileIndex::build(&self.directories())
    }

    /// Creates the output directory when needed.
    pub fn output_target(&self) -> Result<OutputTarget> {
        match (&self.output.dir, &self.output.database) {
            (Some(dir), None) => Ok(OutputTarget::Directory(DirOutput::create(dir)?)),
            (None, Some(db)) => Ok(OutputTarget::Database(DbOutput::new(
                db.params.clone(),
                db.schema.clone(),
                db.table.clone(),
            ))),
            (Some(_), Some(_)) => Err(Error::config("output must be either 'dir' or 'database', not both")),
            (None, None) => Err(Error::OutputNotConfigured),
        }
    }

    /// The `worker` section with output extras merged into its flags. Keys
    /// set in `worker.flags` win.
    pub fn worker_params(&self) -> WorkerParams {
        let mut params = self.worker.clone();
        for (key, value) in &self.output.extra {
            if let Some(value) = yaml_scalar(value) {
                params.flags.entry(key.clone()).or_insert(value);
            }
        }
        params
    }

    pub fn process_runner(&self, execute: bool) -> ProcessRunner {
        let runner = if execute { ProcessRunner::new() } else { ProcessRunner::dry_run() };
        match self.timeout_secs {
            Some(secs) => runner.with_timeout(Duration::from_secs(secs)),
            None => runner,
        }
    }

    /// Install the global subscriber from the `logging` section, with a net
    /// `-v`/`-q` count overriding its level.
    pub fn init_logging(&self, verbosity: Option<i32>) -> bool {
        logging::init_logging(&self.logging.clone().with_verbosity(verbosity))
    }

    /// The resource monitor, when the `monitor` section is present.
    pub fn open_monitor(&self) -> Result<Option<Monitor>> {
        let Some(monitor) = &self.monitor else {
            return Ok(None);
        };
        let dir = monitor.dir.clone().unwrap_or_else(FileMonitorSink::default_dir);
        let sink = FileMonitorSink::open_in(&dir)?;
        info!(path = %sink.path().display(), interval_secs = monitor.interval().as_secs(), "resource monitoring enabled");
        Ok(Some(Monitor::new(Arc::new(sink), monitor.interval())))
    }

    /// Executables, monitor and work directory for running jobs with `runner`.
    pub fn execution_params(&self, runner: Arc<dyn CommandRunner>, output: &OutputTarget) -> Result<ExecutionParams> {
        let mut params =
            ExecutionParams::new(runner, self.work_dir(output)).with_executables(self.executables.clone());
        if let Some(monitor) = self.open_monitor()? {
            params = params.with_monitor(monitor);
        }
        Ok(params)
    }

    /// Where per-tile job files are written: `work_dir`, else the output
    /// directory, else the system temp directory.
    pub fn work_dir(&self, output: &OutputTarget) -> PathBuf {
        match (&self.work_dir, output) {
            (Some(dir), _) => dir.clone(),
            (None, OutputTarget::Directory(dir)) => dir.path().to_path_buf(),
            (None, OutputTarget::Database(_)) => std::env::temp_dir(),
        }
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
