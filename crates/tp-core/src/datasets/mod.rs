//! Auxiliary datasets matched to feature tiles.
//!
//! Elevation point clouds are tiled independently of the feature tiles. The
//! [`DatasetMatcher`] resolves, for every feature tile, which point cloud
//! files cover it and which release each file belongs to.

pub mod file_index;
pub mod matcher;

pub use file_index::{DirectoryPattern, FileIndex};
pub use matcher::DatasetMatcher;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tp_common::TileId;

/// How the elevation tiling relates to the feature tiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TilingRelation {
    /// Same tile boundaries and identifiers.
    #[default]
    Identical,
    /// Elevation tiles are larger; several feature tiles share one.
    Coarser,
    /// Elevation tiles are smaller; one feature tile needs several.
    Finer,
}

/// One input file together with the dataset release it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub path: PathBuf,
    pub version: Option<u32>,
}

/// Input files per feature tile, computed once after tile resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetMapping(BTreeMap<TileId, Vec<DatasetEntry>>);

impl DatasetMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tile: TileId, entries: Vec<DatasetEntry>) {
        self.0.insert(tile, entries);
    }

    /// Entries for `tile`; empty when the tile has no data.
    pub fn entries(&self, tile: &TileId) -> &[DatasetEntry] {
        self.0.get(tile).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct known versions among the entries of `tile`.
    pub fn versions(&self, tile: &TileId) -> BTreeSet<u32> {
        self.entries(tile).iter().filter_map(|e| e.version).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tiles without any entry.
    pub fn tiles_without_data(&self) -> impl Iterator<Item = &TileId> {
        self.0.iter().filter(|(_, e)| e.is_empty()).map(|(t, _)| t)
    }
}

impl FromIterator<(TileId, Vec<DatasetEntry>)> for DatasetMapping {
    fn from_iter<I: IntoIterator<Item = (TileId, Vec<DatasetEntry>)>>(iter: I) -> Self {
        DatasetMapping(iter.into_iter().collect())
    }
}
