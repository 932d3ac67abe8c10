//! The query seam between the engine and a PostGIS database.
//!
//! Connection management and query execution live outside this crate. The
//! engine only needs to send parameterised SQL and read back rows of plain
//! values, so the whole dependency is one trait method.

use crate::tiles::extent::Extent;
use tp_common::{Error, Result, TileId};

/// A bound query parameter (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    TextArray(Vec<String>),
    /// Bound as the EWKT text of the extent, see [`Extent::to_ewkt`].
    Geometry(Extent),
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

pub type Row = Vec<SqlValue>;

/// Executes SQL against the tile index database.
pub trait Database: Send + Sync {
    fn query(&self, sql: &str, params: &[QueryParam]) -> Result<Vec<Row>>;
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Text or integer rendered as a tile identifier.
    pub fn to_tile_id(&self, column: &str) -> Result<TileId> {
        match self {
            SqlValue::Text(s) => Ok(TileId::new(s.clone())),
            SqlValue::Int(i) => Ok(TileId::new(i.to_string())),
            SqlValue::Null => Err(decode_err(column, "NULL tile identifier")),
        }
    }

    /// Dataset version, accepting integer or numeric text columns.
    pub fn to_version(&self, column: &str) -> Result<Option<u32>> {
        match self {
            SqlValue::Null => Ok(None),
            SqlValue::Int(i) => u32::try_from(*i)
                .map(Some)
                .map_err(|_| decode_err(column, &format!("version {} out of range", i))),
            SqlValue::Text(s) => s
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|_| decode_err(column, &format!("'{}' is not a version number", s))),
        }
    }
}

fn decode_err(column: &str, detail: &str) -> Error {
    Error::RowDecode {
        column: column.to_string(),
        detail: detail.to_string(),
    }
}

/// Value at `idx` of a row, or a decode error naming the column.
pub(crate) fn column<'a>(row: &'a Row, idx: usize, name: &str) -> Result<&'a SqlValue> {
    row.get(idx)
        .ok_or_else(|| decode_err(name, &format!("row has {} columns, wanted index {}", row.len(), idx)))
}
