//! Elevation dataset versions.
//!
//! The elevation index records which release of the point cloud covers each
//! tile. Tiles on the border between two releases are listed in a separate
//! table. Runs can be split along these lines so that each executes against a
//! homogeneous set of inputs.

use super::ResolvedTileSet;
use crate::db::{column, Database};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tp_common::schema::quote_ident;
use tp_common::{Error, Result, TileIndexSchema};
use tracing::debug;

/// Which part of a tile set to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionFilter {
    #[default]
    All,
    /// Tiles covered by a single version and not on a border.
    Version(u32),
    /// Tiles on a version border.
    Border,
}

impl fmt::Display for VersionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionFilter::All => write!(f, "all"),
            VersionFilter::Version(v) => write!(f, "version {}", v),
            VersionFilter::Border => write!(f, "border"),
        }
    }
}

pub struct VersionIndex {
    db: Arc<dyn Database>,
    index: TileIndexSchema,
}

impl VersionIndex {
    pub fn new(db: Arc<dyn Database>, index: TileIndexSchema) -> Self {
        VersionIndex { db, index }
    }

    fn version_field(&self) -> Result<&str> {
        self.index.field.version.as_deref().ok_or_else(|| {
            Error::config(format!(
                "no version field configured for {}",
                self.index.qualified_table()
            ))
        })
    }

    /// Distinct versions present in the index, ascending.
    pub fn versions(&self) -> Result<Vec<u32>> {
        let field = self.version_field()?;
        let sql = format!(
            "SELECT DISTINCT {v} FROM {table} WHERE {v} IS NOT NULL",
            v = quote_ident(field),
            table = self.index.qualified_table(),
        );
        let mut versions = Vec::new();
        for row in self.db.query(&sql, &[])? {
            if let Some(v) = column(&row, 0, field)?.to_version(field)? {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        versions.dedup();
        Ok(versions)
    }

    /// Tiles listed in the borders table.
    pub fn border_tiles(&self) -> Result<ResolvedTileSet> {
        let borders = self.index.qualified_borders().ok_or_else(|| {
            Error::config(format!(
                "no borders table configured for {}",
                self.index.qualified_table()
            ))
        })?;
        let field = &self.index.field.tile;
        let sql = format!("SELECT DISTINCT {} FROM {}", quote_ident(field), borders);
        self.db
            .query(&sql, &[])?
            .iter()
            .map(|row| column(row, 0, field)?.to_tile_id(field))
            .collect()
    }

    /// Non-border tiles grouped by their version.
    pub fn tiles_per_version(&self) -> Result<BTreeMap<u32, ResolvedTileSet>> {
        let version_field = self.version_field()?;
        let tile_field = &self.index.field.tile;
        let border = match self.index.borders {
            Some(_) => self.border_tiles()?,
            None => ResolvedTileSet::new(),
        };
        let sql = format!(
            "SELECT {v}, {tile} FROM {table} WHERE {v} IS NOT NULL",
            v = quote_ident(version_field),
            tile = quote_ident(tile_field),
            table = self.index.qualified_table(),
        );

        let mut grouped: BTreeMap<u32, Vec<_>> = BTreeMap::new();
        for row in self.db.query(&sql, &[])? {
            let tile = column(&row, 1, tile_field)?.to_tile_id(tile_field)?;
            if border.contains(&tile) {
                continue;
            }
            if let Some(v) = column(&row, 0, version_field)?.to_version(version_field)? {
                grouped.entry(v).or_default().push(tile);
            }
        }
        Ok(grouped
            .into_iter()
            .map(|(v, tiles)| (v, tiles.into_iter().collect()))
            .collect())
    }

    /// Narrow `tiles` to the part selected by `filter`.
    pub fn apply(&self, filter: VersionFilter, tiles: &ResolvedTileSet) -> Result<ResolvedTileSet> {
        let selected = match filter {
            VersionFilter::All => return Ok(tiles.clone()),
            VersionFilter::Border => tiles.intersection(&self.border_tiles()?),
            VersionFilter::Version(v) => {
                let mut per_version = self.tiles_per_version()?;
                let Some(in_version) = per_version.remove(&v) else {
                    return Err(Error::config(format!(
                        "version {} is not in the elevation index, available: {:?}",
                        v,
                        self.versions()?
                    )));
                };
                tiles.intersection(&in_version)
            }
        };
        debug!(filter = %filter, before = tiles.len(), after = selected.len(), "applied version filter");
        Ok(selected)
    }
}
