//! Fuzz target for /proc/[pid]/stat and /proc/[pid]/statm parsing.
//!
//! The command name field may contain spaces and parentheses, so the stat
//! parser has to cope with any string.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_core::runner::proc_stats::{parse_stat_times, parse_statm_resident};

fuzz_target!(|data: &str| {
    let _ = parse_stat_times(data);
    let _ = parse_statm_resident(data);
});
