//! Process runner with output capture, resource sampling, and an optional
//! deadline.
//!
//! The child's stdout and stderr are drained with non-blocking reads while it
//! runs, so a chatty process never stalls on a full pipe. When a monitor is
//! attached the child is sampled every monitor interval until it exits. With
//! a timeout set, an overdue child gets SIGTERM, then SIGKILL after a grace
//! period.

use super::{classify, proc_stats, CommandRunner, ExecutionMode, JobCommand, Monitor, RunnerError};
use std::io::Read;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

/// Pause between polls when the child produced no output.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    execute: bool,
    timeout: Option<Duration>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        ProcessRunner {
            execute: true,
            timeout: None,
        }
    }
}

struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    timed_out: bool,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner that logs commands instead of executing them.
    pub fn dry_run() -> Self {
        ProcessRunner {
            execute: false,
            ..Self::default()
        }
    }

    /// Kill jobs running longer than `timeout` and count them as failed.
    /// Without a timeout the runner waits for the job indefinitely.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn executes(&self) -> bool {
        self.execute
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn build_command(command: &JobCommand) -> Command {
        let mut cmd = match command.mode {
            ExecutionMode::Direct => {
                let mut cmd = Command::new(&command.program);
                cmd.args(&command.args);
                cmd
            }
            ExecutionMode::Shell => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command.shell_line());
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn supervise(
        &self,
        child: &mut Child,
        command: &JobCommand,
        monitor: Option<&Monitor>,
    ) -> Result<Captured, RunnerError> {
        let pid = child.id();
        let start = Instant::now();
        let deadline = self.timeout.map(|t| start + t);
        let mut next_sample = monitor.map(|m| start + m.interval());

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut chunk = vec![0u8; 8192];

        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!(pid, "command timed out, sending SIGTERM");
                kill_with_grace(child);
                break;
            }

            let mut did_read = false;
            if let Some(ref mut out) = stdout {
                if let Ok(n) = try_read_nonblocking(out, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        stdout_buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
            if let Some(ref mut err) = stderr {
                if let Ok(n) = try_read_nonblocking(err, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        stderr_buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }

            if let (Some(monitor), Some(at)) = (monitor, next_sample) {
                if Instant::now() >= at {
                    match proc_stats::sample(pid) {
                        Some(sample) => monitor.emit(&command.tile, sample),
                        None => trace!(pid, "no resource sample available"),
                    }
                    next_sample = Some(at + monitor.interval());
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    if let Some(ref mut out) = stdout {
                        drain(out, &mut stdout_buf)?;
                    }
                    if let Some(ref mut err) = stderr {
                        drain(err, &mut stderr_buf)?;
                    }
                    trace!(exit_code = ?status.code(), "process exited");
                    return Ok(Captured {
                        stdout: stdout_buf,
                        stderr: stderr_buf,
                        exit_code: status.code(),
                        timed_out: false,
                    });
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(POLL_INTERVAL);
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    return Err(RunnerError::Io(e));
                }
            }
        }

        let status = child.wait()?;
        if let Some(ref mut out) = stdout {
            drain(out, &mut stdout_buf)?;
        }
        if let Some(ref mut err) = stderr {
            drain(err, &mut stderr_buf)?;
        }
        Ok(Captured {
            stdout: stdout_buf,
            stderr: stderr_buf,
            exit_code: status.code(),
            timed_out: true,
        })
    }
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip(self, command, monitor), fields(tile = %command.tile))]
    fn run(&self, command: &JobCommand, monitor: Option<&Monitor>) -> Result<bool, RunnerError> {
        if !self.execute {
            info!(command = %command, mode = ?command.mode, "dry run, not executing");
            return Ok(true);
        }

        debug!(command = %command, mode = ?command.mode, "executing");
        let mut child = Self::build_command(command)
            .spawn()
            .map_err(|source| RunnerError::SpawnFailed {
                command: command.program.clone(),
                source,
            })?;

        let captured = self.supervise(&mut child, command, monitor)?;
        let stdout = String::from_utf8(captured.stdout).map_err(|source| RunnerError::Decode {
            stream: "stdout",
            source,
        })?;
        let stderr = String::from_utf8(captured.stderr).map_err(|source| RunnerError::Decode {
            stream: "stderr",
            source,
        })?;

        if captured.timed_out {
            error!(
                timeout = ?self.timeout,
                stdout = %stdout,
                stderr = %stderr,
                "command timed out"
            );
            return Ok(false);
        }

        let success = classify(captured.exit_code, &stderr);
        if success {
            debug!(exit_code = ?captured.exit_code, stdout = %stdout, stderr = %stderr, "command succeeded");
        } else {
            error!(exit_code = ?captured.exit_code, stdout = %stdout, stderr = %stderr, "command failed");
        }
        Ok(success)
    }
}

/// Kill a process with SIGTERM, then SIGKILL after the grace period.
#[cfg(unix)]
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as i32;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    thread::sleep(Duration::from_millis(SIGTERM_GRACE_MS));

    match child.try_wait() {
        Ok(Some(_)) => {
            trace!(pid, "process exited after SIGTERM");
        }
        Ok(None) => {
            warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            unsafe {
                libc::kill(pid, libc::SIGKILL);
            }
        }
        Err(e) => {
            error!(pid, error = %e, "failed to check process status");
        }
    }
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut Child) {
    let _ = child.kill();
}

/// Read what is immediately available without blocking on grandchildren
/// that keep the pipe open.
#[cfg(unix)]
fn drain<R: Read + AsRawFd>(stream: &mut R, buf: &mut Vec<u8>) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        match try_read_nonblocking(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn drain<R: Read>(stream: &mut R, buf: &mut Vec<u8>) -> std::io::Result<()> {
    stream.read_to_end(buf).map(|_| ())
}

/// Read without blocking. Returns `Ok(0)` when no data is available.
#[cfg(unix)]
fn try_read_nonblocking<R: Read + AsRawFd>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Falls back to a blocking read.
#[cfg(not(unix))]
fn try_read_nonblocking<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::MemoryMonitorSink;
    use std::sync::Arc;
    use tp_common::TileId;

    fn sh(tile: &str, script: &str) -> JobCommand {
        JobCommand::new(&TileId::from(tile), "sh").args(["-c", script])
    }

    #[test]
    fn test_success() {
        let runner = ProcessRunner::new();
        assert!(runner.run(&sh("a", "echo hello"), None).unwrap());
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let runner = ProcessRunner::new();
        assert!(!runner.run(&sh("a", "exit 42"), None).unwrap());
    }

    #[test]
    fn test_error_on_stderr_with_zero_exit_fails() {
        let runner = ProcessRunner::new();
        let cmd = sh("a", "echo 'ERROR: no points in tile' >&2; exit 0");
        assert!(!runner.run(&cmd, None).unwrap());
    }

    #[test]
    fn test_error_on_stdout_only_succeeds() {
        let runner = ProcessRunner::new();
        assert!(runner.run(&sh("a", "echo 'error count: 0'"), None).unwrap());
    }

    #[test]
    fn test_shell_mode_interprets_line() {
        let runner = ProcessRunner::new();
        let cmd = JobCommand::new(&TileId::from("a"), "exit")
            .arg("5")
            .mode(ExecutionMode::Shell);
        assert!(!runner.run(&cmd, None).unwrap());
    }

    #[test]
    fn test_shell_mode_passes_metacharacters_literally() {
        let tmp = tempfile::TempDir::new().unwrap();
        let target = tmp.path().join("out(1);$HOME&`id`");
        let cmd = JobCommand::new(&TileId::from("a;b"), "touch")
            .arg(target.display().to_string())
            .mode(ExecutionMode::Shell);
        assert!(ProcessRunner::new().run(&cmd, None).unwrap());
        assert!(target.exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_dry_run_never_spawns() {
        let runner = ProcessRunner::dry_run();
        let cmd = JobCommand::new(&TileId::from("a"), "/nonexistent/3dfier");
        assert!(runner.run(&cmd, None).unwrap());
        assert!(!runner.executes());
    }

    #[test]
    fn test_spawn_failure_is_error() {
        let runner = ProcessRunner::new();
        let cmd = JobCommand::new(&TileId::from("a"), "/nonexistent/3dfier");
        assert!(matches!(
            runner.run(&cmd, None),
            Err(RunnerError::SpawnFailed { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8_surfaces() {
        let runner = ProcessRunner::new();
        let result = runner.run(&sh("a", "printf '\\377\\376'"), None);
        assert!(matches!(
            result,
            Err(RunnerError::Decode { stream: "stdout", .. })
        ));
    }

    #[test]
    fn test_large_output_does_not_block() {
        let runner = ProcessRunner::new().with_timeout(Duration::from_secs(20));
        let cmd = sh("a", "head -c 300000 /dev/zero | tr '\\0' 'a'");
        assert!(runner.run(&cmd, None).unwrap());
    }

    #[test]
    fn test_timeout_kills_and_fails() {
        let runner = ProcessRunner::new().with_timeout(Duration::from_millis(200));
        let start = Instant::now();
        assert!(!runner.run(&sh("a", "sleep 10"), None).unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_monitor_samples_until_exit() {
        let sink = Arc::new(MemoryMonitorSink::new());
        let monitor = Monitor::new(sink.clone(), Duration::from_millis(50));
        let runner = ProcessRunner::new();
        assert!(runner.run(&sh("37en1", "sleep 0.5"), Some(&monitor)).unwrap());

        let records = sink.records();
        assert!(records.len() >= 2, "got {} samples", records.len());
        assert!(records.iter().all(|r| r.tile == TileId::from("37en1")));
        let pid = records[0].sample.pid;
        assert!(records.iter().all(|r| r.sample.pid == pid));
    }

    #[test]
    fn test_short_job_with_long_interval_has_no_samples() {
        let sink = Arc::new(MemoryMonitorSink::new());
        let monitor = Monitor::new(sink.clone(), Duration::from_secs(30));
        assert!(ProcessRunner::new().run(&sh("a", "true"), Some(&monitor)).unwrap());
        assert!(sink.records().is_empty());
    }
}
