//! Table layouts of the tile indexes and the feature table.
//!
//! Layouts are supplied by the caller and never inferred from the database.
//! They deserialize from the run configuration:
//!
//! ```yaml
//! elevation_tiles:
//!   schema: ahn_tiles
//!   table: index
//!   borders: border_tiles
//!   field: { pk: id, geometry: geom, tile: unit, version: ahn_version }
//! ```

use serde::{Deserialize, Serialize};

/// Column names of a tile index table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFields {
    pub pk: String,
    pub geometry: String,
    pub tile: String,
    /// Dataset version column. Only elevation indexes carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A tile index: one footprint polygon per tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileIndexSchema {
    pub schema: String,
    pub table: String,
    /// Table in the same schema listing tiles on a version border.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borders: Option<String>,
    pub field: IndexFields,
}

impl TileIndexSchema {
    pub fn new(schema: &str, table: &str, pk: &str, geometry: &str, tile: &str) -> Self {
        TileIndexSchema {
            schema: schema.to_string(),
            table: table.to_string(),
            borders: None,
            field: IndexFields {
                pk: pk.to_string(),
                geometry: geometry.to_string(),
                tile: tile.to_string(),
                version: None,
            },
        }
    }

    pub fn with_version_field(mut self, field: &str) -> Self {
        self.field.version = Some(field.to_string());
        self
    }

    pub fn with_borders(mut self, table: &str) -> Self {
        self.borders = Some(table.to_string());
        self
    }

    /// Quoted `"schema"."table"`.
    pub fn qualified_table(&self) -> String {
        qualify(&self.schema, &self.table)
    }

    /// Quoted `"schema"."borders"`, when a borders table is configured.
    pub fn qualified_borders(&self) -> Option<String> {
        self.borders.as_deref().map(|b| qualify(&self.schema, b))
    }
}

/// Column names of the feature table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFields {
    pub pk: String,
    pub geometry: String,
    pub tile: String,
    /// Stable per-feature identifier carried into the generated outputs.
    pub uniqueid: String,
}

/// The feature table (building footprints) processed per tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub schema: String,
    pub table: String,
    pub field: FeatureFields,
}

impl FeatureSchema {
    pub fn new(schema: &str, table: &str, pk: &str, geometry: &str, tile: &str, uniqueid: &str) -> Self {
        FeatureSchema {
            schema: schema.to_string(),
            table: table.to_string(),
            field: FeatureFields {
                pk: pk.to_string(),
                geometry: geometry.to_string(),
                tile: tile.to_string(),
                uniqueid: uniqueid.to_string(),
            },
        }
    }

    pub fn qualified_table(&self) -> String {
        qualify(&self.schema, &self.table)
    }
}

/// Double-quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL string literal with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualify(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_literal_escapes() {
        assert_eq!(quote_literal("37en1"), "'37en1'");
        assert_eq!(quote_literal("x' OR '1'='1"), "'x'' OR ''1''=''1'");
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("unit"), "\"unit\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualified_table() {
        let idx = TileIndexSchema::new("bag_tiles", "index", "id", "geom", "unit");
        assert_eq!(idx.qualified_table(), "\"bag_tiles\".\"index\"");
        assert_eq!(idx.qualified_borders(), None);
        let idx = idx.with_borders("border_tiles");
        assert_eq!(
            idx.qualified_borders().as_deref(),
            Some("\"bag_tiles\".\"border_tiles\"")
        );
    }

    #[test]
    fn test_deserialize_elevation_index() {
        let yaml = r#"
schema: ahn_tiles
table: index
borders: border_tiles
field:
  pk: id
  geometry: geom
  tile: unit
  version: ahn_version
"#;
        let idx: TileIndexSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(idx.field.version.as_deref(), Some("ahn_version"));
        assert_eq!(idx.borders.as_deref(), Some("border_tiles"));
    }

    #[test]
    fn test_deserialize_feature_schema_requires_uniqueid() {
        let yaml = "schema: bagactueel\ntable: pandactueelbestaand\nfield: {pk: gid, geometry: geovlak, tile: unit}\n";
        assert!(serde_yaml::from_str::<FeatureSchema>(yaml).is_err());
        let yaml = "schema: bagactueel\ntable: pandactueelbestaand\nfield: {pk: gid, geometry: geovlak, tile: unit, uniqueid: identificatie}\n";
        let features: FeatureSchema = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(features.field.uniqueid, "identificatie");
    }
}
