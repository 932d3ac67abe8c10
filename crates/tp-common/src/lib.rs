//! Tile processor common types, identifiers, and errors.
//!
//! This crate provides foundational types shared by tp-core:
//! - Tile identifiers with file-name normalisation
//! - Tile index and feature table schemas
//! - Database connection parameters and PostGIS DSN construction
//! - The unified error type

pub mod connection;
pub mod error;
pub mod id;
pub mod schema;

pub use connection::DbParams;
pub use error::{Error, ErrorCategory, Result};
pub use id::TileId;
pub use schema::{FeatureSchema, TileIndexSchema};
