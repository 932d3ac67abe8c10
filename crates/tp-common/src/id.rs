//! Tile identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tile, unique within one tile index.
///
/// Identifiers read from the index are kept verbatim. Identifiers taken from
/// file names go through [`TileId::normalized`] so that `C_25GN1.LAZ` and the
/// index value `25gn1` agree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(String);

impl TileId {
    pub fn new(id: impl Into<String>) -> Self {
        TileId(id.into())
    }

    /// Lower-cased identifier, used as the key of the elevation file index.
    pub fn normalized(id: &str) -> Self {
        TileId(id.to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The same tile keyed the way the file index keys it.
    pub fn to_normalized(&self) -> Self {
        TileId::normalized(&self.0)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TileId {
    fn from(id: &str) -> Self {
        TileId(id.to_string())
    }
}

impl From<String> for TileId {
    fn from(id: String) -> Self {
        TileId(id)
    }
}

impl AsRef<str> for TileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_verbatim() {
        assert_eq!(TileId::new("25GN1_10").to_string(), "25GN1_10");
    }

    #[test]
    fn test_normalized_lowercases() {
        let id = TileId::new("25GN1_10");
        assert_eq!(id.to_normalized(), TileId::normalized("25gn1_10"));
        assert_eq!(id.to_normalized().as_str(), "25gn1_10");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&TileId::from("37en1")).unwrap();
        assert_eq!(json, "\"37en1\"");
        let back: TileId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TileId::from("37en1"));
    }
}
