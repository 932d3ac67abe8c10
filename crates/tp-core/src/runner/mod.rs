//! Running external tile jobs.
//!
//! A [`JobCommand`] names the program, its arguments, the tile it works on,
//! and whether it must go through a shell. A [`CommandRunner`] executes it
//! and reports success or failure; [`ProcessRunner`] is the real
//! implementation, spawning the process, sampling its resource usage while it
//! runs, and classifying the outcome.

pub mod monitor;
pub mod proc_stats;
pub mod process;

pub use monitor::{FileMonitorSink, MemoryMonitorSink, Monitor, MonitorRecord, MonitorSink};
pub use process::ProcessRunner;

use regex::Regex;
use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
use tp_common::TileId;

/// Errors that prevent a command from producing a classifiable outcome.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stream} is not valid UTF-8: {source}")]
    Decode {
        stream: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the command line reaches the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Program and arguments are passed as an argument vector.
    #[default]
    Direct,
    /// Program and arguments are joined into one string for `sh -c`. Needed
    /// by executables that parse their own command line from a single string.
    Shell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    pub tile: TileId,
    pub program: String,
    pub args: Vec<String>,
    pub mode: ExecutionMode,
}

impl JobCommand {
    pub fn new(tile: &TileId, program: impl Into<String>) -> Self {
        JobCommand {
            tile: tile.clone(),
            program: program.into(),
            args: Vec::new(),
            mode: ExecutionMode::Direct,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Program and arguments joined by spaces for `sh -c`. Every token with a
    /// character outside `[A-Za-z0-9_./:=,+@%-]` is single-quoted, so shell
    /// operators reach the program as literal arguments.
    pub fn shell_line(&self) -> String {
        self.tokens().map(|t| shell_quote(t)).collect::<Vec<_>>().join(" ")
    }

    /// The command line as it appears in logs, with database passwords
    /// masked.
    pub fn redacted_line(&self) -> String {
        self.tokens()
            .map(|t| shell_quote(&redact_password(t)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn tokens(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.program).chain(self.args.iter())
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted_line())
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_./:=,+@%-".contains(c)
}

fn shell_quote(token: &str) -> String {
    if !token.is_empty() && token.chars().all(is_shell_safe) {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', "'\\''"))
    }
}

fn redact_password(token: &str) -> Cow<'_, str> {
    static PASSWORD: OnceLock<Regex> = OnceLock::new();
    PASSWORD
        .get_or_init(|| Regex::new(r"(password=)\S*").expect("valid password regex"))
        .replace_all(token, "${1}[redacted]")
}

/// Executes a job command and reports whether it succeeded.
///
/// `Ok(false)` is an ordinary failed job. `Err` means the outcome could not
/// be determined at all, for example because the program could not be started.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &JobCommand, monitor: Option<&Monitor>) -> Result<bool, RunnerError>;
}

/// Whether a finished process counts as successful.
///
/// A non-zero exit code or death by signal (`None`) is a failure. So is any
/// mention of "error" in stderr, whatever the exit code, since some tools
/// report failures only there.
pub fn classify(exit_code: Option<i32>, stderr: &str) -> bool {
    exit_code == Some(0) && !stderr.to_lowercase().contains("error")
}
