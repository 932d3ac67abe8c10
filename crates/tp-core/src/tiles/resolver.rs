//! Extent to tile set resolution.

use super::{Extent, ResolvedTileSet};
use crate::db::{column, Database, QueryParam};
use std::sync::Arc;
use tp_common::schema::quote_ident;
use tp_common::{Result, TileIndexSchema};
use tracing::{debug, instrument};

/// Finds the tiles whose footprint intersects an extent.
pub struct SpatialResolver {
    db: Arc<dyn Database>,
    index: TileIndexSchema,
}

impl SpatialResolver {
    pub fn new(db: Arc<dyn Database>, index: TileIndexSchema) -> Self {
        SpatialResolver { db, index }
    }

    /// Tiles whose footprint geometrically intersects `extent`.
    ///
    /// The test is evaluated by PostGIS on the geometries themselves, so a
    /// tile inside the extent's bounding box but outside the extent is not
    /// returned. An empty set is a valid answer.
    #[instrument(skip(self, extent), fields(table = %self.index.qualified_table()))]
    pub fn resolve(&self, extent: &Extent) -> Result<ResolvedTileSet> {
        let sql = self.intersects_sql();
        let rows = self
            .db
            .query(&sql, &[QueryParam::Geometry(extent.clone())])?;
        let tiles = rows
            .iter()
            .map(|row| column(row, 0, &self.index.field.tile)?.to_tile_id(&self.index.field.tile))
            .collect::<Result<ResolvedTileSet>>()?;
        debug!(count = tiles.len(), bbox = ?extent.bbox(), "tiles intersecting extent");
        Ok(tiles)
    }

    fn intersects_sql(&self) -> String {
        format!(
            "SELECT DISTINCT {tile} FROM {table} WHERE ST_Intersects({geom}, ST_GeomFromEWKT($1))",
            tile = quote_ident(&self.index.field.tile),
            table = self.index.qualified_table(),
            geom = quote_ident(&self.index.field.geometry),
        )
    }
}
