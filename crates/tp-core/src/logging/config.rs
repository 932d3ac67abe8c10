//! The `logging` section of a run configuration.
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: jsonl
//!   timestamps: false
//! ```
//!
//! A net `-v`/`-q` count overrides `level`. An explicit `RUST_LOG` filter
//! overrides both.

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per line, for runs driven by a scheduler.
    Jsonl,
}

/// Threshold for engine messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
    Off,
}

impl LogLevel {
    /// Level for a net verbosity count: 0 is warn, each `-v` one step more
    /// verbose down to debug, each `-q` one step quieter.
    pub fn from_verbosity(verbosity: i32) -> Self {
        match verbosity {
            v if v >= 2 => LogLevel::Debug,
            1 => LogLevel::Info,
            0 => LogLevel::Warn,
            -1 => LogLevel::Error,
            _ => LogLevel::Off,
        }
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Prefix human output with a timestamp.
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Warn,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Replace the configured level by the one for `verbosity`, if given.
    pub fn with_verbosity(mut self, verbosity: Option<i32>) -> Self {
        if let Some(v) = verbosity {
            self.level = LogLevel::from_verbosity(v);
        }
        self
    }

    /// Filter directive used when `RUST_LOG` is unset.
    pub fn directive(&self) -> String {
        format!("tp_core={}", self.level.filter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_verbosity() {
        assert_eq!(LogLevel::from_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::from_verbosity(1), LogLevel::Info);
        assert_eq!(LogLevel::from_verbosity(5), LogLevel::Debug);
        assert_eq!(LogLevel::from_verbosity(-1), LogLevel::Error);
        assert_eq!(LogLevel::from_verbosity(-3), LogLevel::Off);
    }

    #[test]
    fn test_section_from_yaml() {
        let config: LogConfig = serde_yaml::from_str("level: info\nformat: jsonl\n").unwrap();
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert!(config.timestamps);
        assert!(serde_yaml::from_str::<LogConfig>("level: loud\n").is_err());
        assert!(serde_yaml::from_str::<LogConfig>("colour: true\n").is_err());
    }

    #[test]
    fn test_verbosity_overrides_section() {
        let config = LogConfig::default().with_verbosity(Some(2));
        assert_eq!(config.directive(), "tp_core=debug");
        let config = LogConfig::default().with_verbosity(None);
        assert_eq!(config.directive(), "tp_core=warn");
        assert_eq!(LogConfig::default().with_verbosity(Some(-2)).directive(), "tp_core=off");
    }
}
