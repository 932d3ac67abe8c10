//! Tile selection.
//!
//! A run processes either the tiles intersecting an extent or an explicit
//! list of tile identifiers, never both. Both paths end in a
//! [`ResolvedTileSet`] whose members all exist in the tile index.

pub mod extent;
pub mod index;
pub mod resolver;
pub mod versions;

pub use extent::Extent;
pub use index::TileIndexValidator;
pub use resolver::SpatialResolver;
pub use versions::{VersionFilter, VersionIndex};

use crate::db::Database;
use std::collections::BTreeSet;
use std::sync::Arc;
use tp_common::{Error, Result, TileId, TileIndexSchema};
use tracing::info;

/// Set of tiles to process. Iteration order is sorted and carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTileSet(BTreeSet<TileId>);

impl ResolvedTileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tile: &TileId) -> bool {
        self.0.contains(tile)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileId> {
        self.0.iter()
    }

    /// Tiles present in both sets.
    pub fn intersection(&self, other: &ResolvedTileSet) -> ResolvedTileSet {
        ResolvedTileSet(self.0.intersection(&other.0).cloned().collect())
    }

    /// Tiles of `self` that are not in `other`.
    pub fn difference(&self, other: &ResolvedTileSet) -> ResolvedTileSet {
        ResolvedTileSet(self.0.difference(&other.0).cloned().collect())
    }
}

impl FromIterator<TileId> for ResolvedTileSet {
    fn from_iter<I: IntoIterator<Item = TileId>>(iter: I) -> Self {
        ResolvedTileSet(iter.into_iter().collect())
    }
}

impl IntoIterator for ResolvedTileSet {
    type Item = TileId;
    type IntoIter = std::collections::btree_set::IntoIter<TileId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResolvedTileSet {
    type Item = &'a TileId;
    type IntoIter = std::collections::btree_set::Iter<'a, TileId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// How the caller asked for tiles.
#[derive(Debug, Clone, PartialEq)]
pub enum TileSelection {
    /// Tiles whose footprint intersects the extent.
    Extent(Extent),
    /// An explicit list, filtered against the index.
    List(Vec<TileId>),
    /// Every tile in the index.
    All,
}

impl TileSelection {
    /// Build a selection from the two mutually exclusive inputs.
    ///
    /// A list consisting of the single entry `all` selects the whole index.
    pub fn new(tiles: Option<Vec<String>>, extent: Option<Extent>) -> Result<Self> {
        match (tiles, extent) {
            (Some(_), Some(_)) => Err(Error::config(
                "provide either a list of tiles or an extent, not both",
            )),
            (None, None) => Err(Error::config(
                "provide either a list of tiles or an extent",
            )),
            (None, Some(extent)) => Ok(TileSelection::Extent(extent)),
            (Some(tiles), None) => {
                if tiles.len() == 1 && tiles[0].eq_ignore_ascii_case("all") {
                    Ok(TileSelection::All)
                } else {
                    Ok(TileSelection::List(tiles.into_iter().map(TileId::from).collect()))
                }
            }
        }
    }
}

/// Resolves a [`TileSelection`] against one tile index.
pub struct TileSet {
    resolver: SpatialResolver,
    validator: TileIndexValidator,
}

impl TileSet {
    pub fn new(db: Arc<dyn Database>, index: TileIndexSchema) -> Self {
        TileSet {
            resolver: SpatialResolver::new(Arc::clone(&db), index.clone()),
            validator: TileIndexValidator::new(db, index),
        }
    }

    /// Resolve the selection to the tiles that exist in the index.
    ///
    /// An extent that intersects nothing yields an empty set. A list of which
    /// no member is in the index is rejected.
    pub fn configure(&self, selection: &TileSelection) -> Result<ResolvedTileSet> {
        let tiles = match selection {
            TileSelection::Extent(extent) => self.resolver.resolve(extent)?,
            TileSelection::All => self.validator.all_in_index()?,
            TileSelection::List(ids) => {
                let tiles = self.validator.restrict_to_index(ids)?;
                if tiles.is_empty() {
                    return Err(Error::config(
                        "none of the provided tiles are present in the index",
                    ));
                }
                tiles
            }
        };
        info!(count = tiles.len(), "resolved tiles");
        Ok(tiles)
    }
}
