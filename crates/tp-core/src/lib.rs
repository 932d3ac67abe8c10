//! Tile Processor Core Library
//!
//! Batch processing of geospatial data tile by tile:
//! - Tile selection by extent or identifier list, checked against a tile index
//! - Matching feature tiles to elevation point cloud files
//! - Pluggable per-tile workers driving external executables (3dfier, Geoflow)
//! - Process execution with resource monitoring
//! - Run configuration and structured logging
//!
//! Database access is abstracted behind [`db::Database`]; the crate never
//! opens connections itself.

pub mod batch;
pub mod config;
pub mod datasets;
pub mod db;
pub mod logging;
pub mod output;
pub mod runner;
pub mod tiles;
pub mod worker;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
