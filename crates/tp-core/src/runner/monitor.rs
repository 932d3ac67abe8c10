//! Resource usage monitoring of tile jobs.
//!
//! While a job runs, the runner periodically samples the child and hands one
//! [`MonitorRecord`] per sample to a [`MonitorSink`]. The file sink writes
//! the records to a dedicated TSV log, separate from the diagnostic log:
//!
//! ```text
//! 2026-10-16 14:32:01,123	37en1	4242	12.5	0.31	734003200
//! ```
//!
//! The log can be read back with [`parse_monitor_log`] and condensed per
//! tile with [`summarize`].

use super::proc_stats::ResourceSample;
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tp_common::TileId;
use tracing::{debug, warn};

/// Timestamp layout of the monitor log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// One sample of one tile's process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorRecord {
    pub tile: TileId,
    pub sample: ResourceSample,
}

impl fmt::Display for MonitorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}",
            self.tile,
            self.sample.pid,
            self.sample.user_secs,
            self.sample.system_secs,
            self.sample.rss_bytes
        )
    }
}

impl FromStr for MonitorRecord {
    type Err = String;

    /// Parse `<tile>\t<pid>\t<user>\t<system>\t<rss>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim_end_matches(['\r', '\n']).split('\t').collect();
        let [tile, pid, user, system, rss] = fields.as_slice() else {
            return Err(format!("expected 5 tab-separated fields, got {}", fields.len()));
        };
        if tile.is_empty() {
            return Err("empty tile identifier".to_string());
        }
        let num_err = |name: &str, value: &str| format!("invalid {}: '{}'", name, value);
        Ok(MonitorRecord {
            tile: TileId::new(*tile),
            sample: ResourceSample {
                pid: pid.parse().map_err(|_| num_err("pid", *pid))?,
                user_secs: user.parse().map_err(|_| num_err("user time", *user))?,
                system_secs: system.parse().map_err(|_| num_err("system time", *system))?,
                rss_bytes: rss.parse().map_err(|_| num_err("rss", *rss))?,
            },
        })
    }
}

/// Receives monitor records. Implementations must tolerate concurrent calls.
pub trait MonitorSink: Send + Sync {
    fn record(&self, record: &MonitorRecord) -> io::Result<()>;
}

/// Append-only TSV log, one `<timestamp>\t<record>` line per sample.
pub struct FileMonitorSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileMonitorSink {
    /// `tile-resource-usage_<YYYY-MM-DD>.tsv`
    pub fn file_name(date: NaiveDate) -> String {
        format!("tile-resource-usage_{}.tsv", date.format("%Y-%m-%d"))
    }

    /// Open today's log in `dir`, creating the directory if needed.
    pub fn open_in(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Self::open(dir.join(Self::file_name(Local::now().date_naive())))
    }

    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened monitor log");
        Ok(FileMonitorSink {
            path,
            file: Mutex::new(file),
        })
    }

    /// Per-user location for monitor logs when none is configured.
    pub fn default_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("tile-processor")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MonitorSink for FileMonitorSink {
    fn record(&self, record: &MonitorRecord) -> io::Result<()> {
        let line = format!("{}\t{}\n", Local::now().format(TIMESTAMP_FORMAT), record);
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("monitor log lock poisoned"))?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryMonitorSink {
    records: Mutex<Vec<MonitorRecord>>,
}

impl MemoryMonitorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MonitorRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl MonitorSink for MemoryMonitorSink {
    fn record(&self, record: &MonitorRecord) -> io::Result<()> {
        self.records
            .lock()
            .map_err(|_| io::Error::other("monitor records lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// A sink together with its sampling interval.
#[derive(Clone)]
pub struct Monitor {
    sink: Arc<dyn MonitorSink>,
    interval: Duration,
}

impl Monitor {
    pub fn new(sink: Arc<dyn MonitorSink>, interval: Duration) -> Self {
        Monitor { sink, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forward a sample. Sink failures are logged, never propagated.
    pub fn emit(&self, tile: &TileId, sample: ResourceSample) {
        let record = MonitorRecord {
            tile: tile.clone(),
            sample,
        };
        if let Err(e) = self.sink.record(&record) {
            warn!(tile = %tile, error = %e, "failed to write monitor record");
        }
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// A parsed line of the monitor log.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorLogEntry {
    pub timestamp: NaiveDateTime,
    pub record: MonitorRecord,
}

/// Parse a monitor log. Malformed lines are skipped and counted in a warning.
pub fn parse_monitor_log(content: &str) -> Vec<MonitorLogEntry> {
    let mut entries = Vec::new();
    let mut skipped = 0usize;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match parse_log_line(line) {
            Some(entry) => entries.push(entry),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "skipped malformed monitor log lines");
    }
    entries
}

fn parse_log_line(line: &str) -> Option<MonitorLogEntry> {
    let (timestamp, record) = line.split_once('\t')?;
    Some(MonitorLogEntry {
        timestamp: NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?,
        record: record.parse().ok()?,
    })
}

/// Peak usage of one tile across its samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileUsage {
    pub samples: usize,
    pub peak_rss_mb: f64,
    pub peak_cpu_minutes: f64,
    /// Time between the first and last sample.
    pub observed_secs: f64,
}

/// Per-tile peak memory and CPU time.
pub fn summarize(entries: &[MonitorLogEntry]) -> BTreeMap<TileId, TileUsage> {
    let mut spans: BTreeMap<TileId, (NaiveDateTime, NaiveDateTime)> = BTreeMap::new();
    let mut usage: BTreeMap<TileId, TileUsage> = BTreeMap::new();
    for entry in entries {
        let tile = &entry.record.tile;
        let sample = &entry.record.sample;
        let u = usage.entry(tile.clone()).or_insert(TileUsage {
            samples: 0,
            peak_rss_mb: 0.0,
            peak_cpu_minutes: 0.0,
            observed_secs: 0.0,
        });
        u.samples += 1;
        u.peak_rss_mb = u.peak_rss_mb.max(sample.rss_bytes as f64 / 1e6);
        u.peak_cpu_minutes = u.peak_cpu_minutes.max(sample.cpu_secs() / 60.0);

        let span = spans
            .entry(tile.clone())
            .or_insert((entry.timestamp, entry.timestamp));
        span.0 = span.0.min(entry.timestamp);
        span.1 = span.1.max(entry.timestamp);
    }
    for (tile, (first, last)) in spans {
        if let Some(u) = usage.get_mut(&tile) {
            u.observed_secs = (last - first).num_milliseconds() as f64 / 1000.0;
        }
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(tile: &str, user: f64, rss: u64) -> MonitorRecord {
        MonitorRecord {
            tile: TileId::from(tile),
            sample: ResourceSample {
                pid: 4242,
                user_secs: user,
                system_secs: 0.5,
                rss_bytes: rss,
            },
        }
    }

    #[test]
    fn test_record_format() {
        assert_eq!(
            record("37en1", 12.25, 1024).to_string(),
            "37en1\t4242\t12.25\t0.5\t1024"
        );
    }

    #[test]
    fn test_record_parse_rejects_bad_lines() {
        assert!("37en1\t4242\t1\t2".parse::<MonitorRecord>().is_err());
        assert!("37en1\tpid\t1\t2\t3".parse::<MonitorRecord>().is_err());
        assert!("\t1\t1\t2\t3".parse::<MonitorRecord>().is_err());
        let r: MonitorRecord = "37en1\t4242\t12.25\t0.5\t1024\n".parse().unwrap();
        assert_eq!(r, record("37en1", 12.25, 1024));
    }

    #[test]
    fn test_file_name() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(
            FileMonitorSink::file_name(date),
            "tile-resource-usage_2026-10-16.tsv"
        );
    }

    #[test]
    fn test_file_sink_appends_and_parses_back() {
        let tmp = TempDir::new().unwrap();
        let sink = FileMonitorSink::open_in(&tmp.path().join("logs")).unwrap();
        sink.record(&record("a", 1.0, 1_000_000)).unwrap();
        sink.record(&record("a", 2.0, 3_000_000)).unwrap();
        sink.record(&record("b", 60.0, 2_000_000)).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 3);
        let entries = parse_monitor_log(&content);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].record, record("b", 60.0, 2_000_000));
    }

    #[test]
    fn test_parse_log_skips_garbage() {
        let content = "2026-10-16 14:32:01,123\ta\t1\t1\t0\t10\n\
                       not a record\n\
                       2026-10-16 14:32:11,123\ta\t1\t3\t0\t20\n";
        let entries = parse_monitor_log(content);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_summarize_peaks() {
        let content = "2026-10-16 14:32:01,000\ta\t1\t30\t0\t1000000\n\
                       2026-10-16 14:32:11,500\ta\t1\t90\t30\t3000000\n\
                       2026-10-16 14:33:00,000\tb\t2\t6\t0\t500000\n";
        let summary = summarize(&parse_monitor_log(content));
        let a = &summary[&TileId::from("a")];
        assert_eq!(a.samples, 2);
        assert!((a.peak_rss_mb - 3.0).abs() < 1e-9);
        assert!((a.peak_cpu_minutes - 2.0).abs() < 1e-9);
        assert!((a.observed_secs - 10.5).abs() < 1e-9);
        assert_eq!(summary[&TileId::from("b")].observed_secs, 0.0);
    }

    #[test]
    fn test_monitor_emit_to_memory() {
        let sink = Arc::new(MemoryMonitorSink::new());
        let monitor = Monitor::new(sink.clone(), Duration::from_millis(5));
        monitor.emit(&TileId::from("x"), record("x", 1.0, 1).sample);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(monitor.interval(), Duration::from_millis(5));
    }

    #[test]
    fn test_default_dir_is_namespaced() {
        assert!(FileMonitorSink::default_dir().ends_with("tile-processor"));
    }
}
