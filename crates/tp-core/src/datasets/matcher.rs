//! Matching feature tiles to elevation files.

use super::{DatasetEntry, DatasetMapping, FileIndex, TilingRelation};
use crate::db::{column, Database, QueryParam, SqlValue};
use crate::tiles::ResolvedTileSet;
use std::sync::Arc;
use tp_common::schema::quote_ident;
use tp_common::{Result, TileId, TileIndexSchema};
use tracing::{debug, error, instrument, warn};

pub struct DatasetMatcher {
    db: Arc<dyn Database>,
    features_index: TileIndexSchema,
    elevation_index: TileIndexSchema,
    relation: TilingRelation,
    files: FileIndex,
}

impl DatasetMatcher {
    pub fn new(
        db: Arc<dyn Database>,
        features_index: TileIndexSchema,
        elevation_index: TileIndexSchema,
        relation: TilingRelation,
        files: FileIndex,
    ) -> Self {
        DatasetMatcher {
            db,
            features_index,
            elevation_index,
            relation,
            files,
        }
    }

    /// Elevation files covering `tile`, each tagged with its version.
    ///
    /// With identical tilings the tile is looked up directly; otherwise every
    /// elevation tile whose footprint intersects the feature tile contributes
    /// its files. Mixed versions are returned as they are. No match is a
    /// valid, empty answer.
    #[instrument(skip(self), fields(relation = ?self.relation))]
    pub fn match_datasets(&self, tile: &TileId) -> Result<Vec<DatasetEntry>> {
        let elevation_tiles = match self.relation {
            TilingRelation::Identical => self.identical(tile)?,
            TilingRelation::Coarser | TilingRelation::Finer => self.overlapping(tile)?,
        };

        let mut entries = Vec::new();
        for (elevation_tile, version) in elevation_tiles {
            let files = self.files.files(&elevation_tile);
            if files.is_empty() {
                debug!(elevation_tile = %elevation_tile, "no files for elevation tile");
            }
            entries.extend(files.iter().map(|path| DatasetEntry {
                path: path.clone(),
                version,
            }));
        }
        entries.sort();
        entries.dedup();
        debug!(count = entries.len(), "matched datasets");
        Ok(entries)
    }

    /// Match every tile of the run once.
    pub fn build_mapping(&self, tiles: &ResolvedTileSet) -> Result<DatasetMapping> {
        let mut mapping = DatasetMapping::new();
        for tile in tiles {
            mapping.insert(tile.clone(), self.match_datasets(tile)?);
        }
        let missing = mapping.tiles_without_data().count();
        if missing > 0 {
            warn!(missing, total = tiles.len(), "tiles without elevation data");
        }
        Ok(mapping)
    }

    fn version_column(&self, alias: Option<&str>) -> String {
        match &self.elevation_index.field.version {
            Some(v) => match alias {
                Some(a) => format!("{}.{}", a, quote_ident(v)),
                None => quote_ident(v),
            },
            None => "NULL".to_string(),
        }
    }

    fn identical(&self, tile: &TileId) -> Result<Vec<(TileId, Option<u32>)>> {
        let field = &self.elevation_index.field;
        let sql = format!(
            "SELECT {tile}, {version} FROM {table} WHERE {tile} = $1",
            tile = quote_ident(&field.tile),
            version = self.version_column(None),
            table = self.elevation_index.qualified_table(),
        );
        let rows = self.db.query(&sql, &[QueryParam::Text(tile.to_string())])?;
        if rows.len() > 1 {
            error!(
                tile = %tile,
                rows = rows.len(),
                table = %self.elevation_index.qualified_table(),
                "tile is duplicated in the elevation index, using the first row"
            );
        }
        let Some(row) = rows.first() else {
            return Ok(Vec::new());
        };
        let version = self.row_version(tile, column(row, 1, "version")?)?;
        Ok(vec![(tile.clone(), version)])
    }

    fn overlapping(&self, tile: &TileId) -> Result<Vec<(TileId, Option<u32>)>> {
        let e = &self.elevation_index.field;
        let f = &self.features_index.field;
        let sql = format!(
            "SELECT DISTINCT e.{e_tile}, {version} FROM {e_table} AS e \
             JOIN {f_table} AS f ON ST_Intersects(e.{e_geom}, f.{f_geom}) \
             WHERE f.{f_tile} = $1",
            e_tile = quote_ident(&e.tile),
            version = self.version_column(Some("e")),
            e_table = self.elevation_index.qualified_table(),
            f_table = self.features_index.qualified_table(),
            e_geom = quote_ident(&e.geometry),
            f_geom = quote_ident(&f.geometry),
            f_tile = quote_ident(&f.tile),
        );
        let rows = self.db.query(&sql, &[QueryParam::Text(tile.to_string())])?;
        let mut matched = Vec::with_capacity(rows.len());
        for row in &rows {
            let elevation_tile = column(row, 0, &e.tile)?.to_tile_id(&e.tile)?;
            let version = self.row_version(&elevation_tile, column(row, 1, "version")?)?;
            matched.push((elevation_tile, version));
        }
        Ok(matched)
    }

    fn row_version(&self, tile: &TileId, value: &SqlValue) -> Result<Option<u32>> {
        let name = self.elevation_index.field.version.as_deref().unwrap_or("version");
        let version = value.to_version(name)?;
        if version.is_none() && self.elevation_index.field.version.is_some() {
            warn!(tile = %tile, "elevation tile has no version");
        }
        Ok(version)
    }
}
