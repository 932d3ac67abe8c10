//! Filtering requested tile identifiers against the tile index.

use super::ResolvedTileSet;
use crate::db::{column, Database, QueryParam};
use std::collections::BTreeSet;
use std::sync::Arc;
use tp_common::schema::quote_ident;
use tp_common::{Result, TileId, TileIndexSchema};
use tracing::{debug, warn};

pub struct TileIndexValidator {
    db: Arc<dyn Database>,
    index: TileIndexSchema,
}

impl TileIndexValidator {
    pub fn new(db: Arc<dyn Database>, index: TileIndexSchema) -> Self {
        TileIndexValidator { db, index }
    }

    /// The requested tiles that exist in the index.
    ///
    /// Duplicates collapse and unknown identifiers are dropped with a single
    /// warning that lists them. The result is a subset of `requested` and
    /// applying the filter to its own output returns the same set.
    pub fn restrict_to_index(&self, requested: &[TileId]) -> Result<ResolvedTileSet> {
        let unique: BTreeSet<&TileId> = requested.iter().collect();
        if unique.is_empty() {
            return Ok(ResolvedTileSet::new());
        }
        let sql = format!(
            "SELECT DISTINCT {tile} FROM {table} WHERE {tile} = ANY($1)",
            tile = quote_ident(&self.index.field.tile),
            table = self.index.qualified_table(),
        );
        let ids: Vec<String> = unique.iter().map(|t| t.to_string()).collect();
        let found = self.tiles_from(&sql, &[QueryParam::TextArray(ids)])?;

        // Only keep what was asked for, even if the database is lenient about matching.
        let tiles: ResolvedTileSet = unique
            .iter()
            .filter(|t| found.contains(**t))
            .map(|t| (*t).clone())
            .collect();

        let dropped: Vec<&str> = unique
            .iter()
            .filter(|t| !tiles.contains(**t))
            .map(|t| t.as_str())
            .collect();
        if !dropped.is_empty() {
            warn!(
                dropped = ?dropped,
                table = %self.index.qualified_table(),
                "tiles not found in the index are skipped"
            );
        }
        Ok(tiles)
    }

    /// Every tile in the index.
    pub fn all_in_index(&self) -> Result<ResolvedTileSet> {
        let sql = format!(
            "SELECT DISTINCT {tile} FROM {table}",
            tile = quote_ident(&self.index.field.tile),
            table = self.index.qualified_table(),
        );
        let tiles = self.tiles_from(&sql, &[])?;
        debug!(count = tiles.len(), "all tiles in index");
        Ok(tiles)
    }

    fn tiles_from(&self, sql: &str, params: &[QueryParam]) -> Result<ResolvedTileSet> {
        let field = &self.index.field.tile;
        self.db
            .query(sql, params)?
            .iter()
            .map(|row| column(row, 0, field)?.to_tile_id(field))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Row, SqlValue};
    use std::collections::HashSet;

    /// Answers `= ANY($1)` queries from a fixed id list.
    struct Known(HashSet<String>);

    impl Database for Known {
        fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>> {
            let rows = match params.first() {
                Some(QueryParam::TextArray(ids)) => ids
                    .iter()
                    .filter(|id| self.0.contains(*id))
                    .map(|id| vec![SqlValue::Text(id.clone())])
                    .collect(),
                _ => {
                    assert!(!sql.contains("$1"));
                    self.0.iter().map(|id| vec![SqlValue::Text(id.clone())]).collect()
                }
            };
            Ok(rows)
        }
    }

    fn validator(ids: &[&str]) -> TileIndexValidator {
        let db = Known(ids.iter().map(|s| s.to_string()).collect());
        TileIndexValidator::new(
            Arc::new(db),
            TileIndexSchema::new("bag_tiles", "index", "id", "geom", "unit"),
        )
    }

    fn ids(list: &[&str]) -> Vec<TileId> {
        list.iter().map(|s| TileId::from(*s)).collect()
    }

    #[test]
    fn test_unknown_ids_dropped() {
        let v = validator(&["25gn1_10", "25gn1_11", "25gn1_6", "25gn1_7"]);
        let tiles = v
            .restrict_to_index(&ids(&["25gn1_10", "25gn1_11", "25gn1_6", "not_in_index"]))
            .unwrap();
        let got: Vec<&str> = tiles.iter().map(|t| t.as_str()).collect();
        assert_eq!(got, vec!["25gn1_10", "25gn1_11", "25gn1_6"]);
    }

    #[test]
    fn test_duplicates_collapse() {
        let v = validator(&["a", "b"]);
        let tiles = v.restrict_to_index(&ids(&["a", "a", "b", "a"])).unwrap();
        assert_eq!(tiles.len(), 2);
    }

    #[test]
    fn test_empty_request_skips_query() {
        struct Never;
        impl Database for Never {
            fn query(&self, _: &str, _: &[QueryParam]) -> Result<Vec<Row>> {
                panic!("no query expected");
            }
        }
        let v = TileIndexValidator::new(
            Arc::new(Never),
            TileIndexSchema::new("s", "t", "id", "geom", "unit"),
        );
        assert!(v.restrict_to_index(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_all_in_index() {
        let v = validator(&["a", "b", "c"]);
        assert_eq!(v.all_in_index().unwrap().len(), 3);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn restrict_is_subset_and_idempotent(
                index in proptest::collection::hash_set("[a-d][0-3]", 0..10),
                requested in proptest::collection::vec("[a-e][0-4]", 0..20),
            ) {
                let index_refs: Vec<&str> = index.iter().map(String::as_str).collect();
                let v = validator(&index_refs);
                let requested = ids(&requested.iter().map(String::as_str).collect::<Vec<_>>());

                let once = v.restrict_to_index(&requested).unwrap();
                for tile in &once {
                    prop_assert!(requested.contains(tile));
                    prop_assert!(index.contains(tile.as_str()));
                }

                let again_input: Vec<TileId> = once.iter().cloned().collect();
                let twice = v.restrict_to_index(&again_input).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
