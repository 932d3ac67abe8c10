//! Fuzz target for monitor log lines.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_core::runner::monitor::parse_monitor_log;
use tp_core::runner::MonitorRecord;

fuzz_target!(|data: &str| {
    let _ = data.parse::<MonitorRecord>();
    let entries = parse_monitor_log(data);
    let _ = tp_core::runner::monitor::summarize(&entries);
});
