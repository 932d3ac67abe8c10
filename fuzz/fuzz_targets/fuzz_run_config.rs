//! Fuzz target for run configuration loading.
//!
//! Parsing and validation run on every YAML document; neither may panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_core::config::RunConfig;

fuzz_target!(|data: &str| {
    let _ = RunConfig::from_yaml_str(data);
});
