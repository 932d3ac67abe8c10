//! Fuzz target for extent polygon files.
//!
//! Extents come from user-supplied GeoJSON; malformed input must surface as
//! an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tp_core::tiles::Extent;

fuzz_target!(|data: &str| {
    if let Ok(extent) = Extent::from_geojson_str(data) {
        // a parsed extent must render to WKT without panicking
        let _ = extent.to_wkt();
    }
});
