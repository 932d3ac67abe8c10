//! Resource counters of a running process.
//!
//! # Data Sources
//! - `/proc/[pid]/stat`: utime, stime (clock ticks)
//! - `/proc/[pid]/statm`: resident set size (pages)
//! - `sysconf(_SC_CLK_TCK)`, `sysconf(_SC_PAGESIZE)`

use serde::{Deserialize, Serialize};
use std::fs;

/// One resource sample of a process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub pid: u32,
    /// CPU time spent in user mode, seconds.
    pub user_secs: f64,
    /// CPU time spent in kernel mode, seconds.
    pub system_secs: f64,
    /// Resident set size, bytes.
    pub rss_bytes: u64,
}

impl ResourceSample {
    pub fn cpu_secs(&self) -> f64 {
        self.user_secs + self.system_secs
    }
}

/// System clock ticks per second.
#[cfg(unix)]
pub fn clk_tck() -> u64 {
    static CLK_TCK: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if tck > 0 {
            tck as u64
        } else {
            100
        }
    })
}

#[cfg(not(unix))]
pub fn clk_tck() -> u64 {
    100
}

/// Memory page size in bytes.
#[cfg(unix)]
pub fn page_size() -> u64 {
    static PAGE_SIZE: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as u64
        } else {
            4096
        }
    })
}

#[cfg(not(unix))]
pub fn page_size() -> u64 {
    4096
}

/// Sample a live process. `None` when the process is gone or `/proc` is
/// unavailable.
pub fn sample(pid: u32) -> Option<ResourceSample> {
    let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let statm = fs::read_to_string(format!("/proc/{}/statm", pid)).ok()?;
    sample_from_content(pid, &stat, &statm, clk_tck(), page_size())
}

/// Build a sample from `/proc` file contents (for testing).
pub fn sample_from_content(
    pid: u32,
    stat: &str,
    statm: &str,
    ticks_per_sec: u64,
    page_bytes: u64,
) -> Option<ResourceSample> {
    let (utime, stime) = parse_stat_times(stat)?;
    let resident = parse_statm_resident(statm)?;
    let tck = ticks_per_sec.max(1) as f64;
    Some(ResourceSample {
        pid,
        user_secs: utime as f64 / tck,
        system_secs: stime as f64 / tck,
        rss_bytes: resident.saturating_mul(page_bytes),
    })
}

/// `(utime, stime)` in clock ticks from `/proc/[pid]/stat` content.
///
/// The command name may contain spaces and parentheses, so fields are
/// counted from the last `)`.
pub fn parse_stat_times(content: &str) -> Option<(u64, u64)> {
    let after_comm = content.get(content.rfind(')')? + 1..)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    // fields[0] is state (field 3 overall); utime and stime are fields 14 and 15
    let utime = fields.get(11)?.parse().ok()?;
    let stime = fields.get(12)?.parse().ok()?;
    Some((utime, stime))
}

/// Resident pages from `/proc/[pid]/statm` content.
pub fn parse_statm_resident(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "4242 (3dfier (tile)) R 1 4242 4242 0 -1 4194304 1200 0 0 0 \
                        250 50 0 0 20 0 1 0 123456 10000000 2000 18446744073709551615";

    #[test]
    fn test_parse_stat_times_with_parens_in_comm() {
        assert_eq!(parse_stat_times(STAT), Some((250, 50)));
    }

    #[test]
    fn test_parse_stat_truncated() {
        assert_eq!(parse_stat_times("4242 (sh) R 1 2 3"), None);
        assert_eq!(parse_stat_times("no parens here"), None);
    }

    #[test]
    fn test_parse_statm() {
        assert_eq!(parse_statm_resident("10000 2500 300 10 0 4000 0\n"), Some(2500));
        assert_eq!(parse_statm_resident("10000"), None);
    }

    #[test]
    fn test_sample_from_content_units() {
        let s = sample_from_content(4242, STAT, "10000 2500 300 10 0 4000 0", 100, 4096).unwrap();
        assert_eq!(s.pid, 4242);
        assert!((s.user_secs - 2.5).abs() < 1e-9);
        assert!((s.system_secs - 0.5).abs() < 1e-9);
        assert!((s.cpu_secs() - 3.0).abs() < 1e-9);
        assert_eq!(s.rss_bytes, 2500 * 4096);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sample_self() {
        let s = sample(std::process::id()).expect("own /proc entry");
        assert!(s.rss_bytes > 0);
    }

    #[test]
    fn test_sample_missing_pid() {
        assert!(sample(u32::MAX).is_none());
    }
}
