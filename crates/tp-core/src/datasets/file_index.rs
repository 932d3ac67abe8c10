//! Index of point cloud files per tile.
//!
//! Each configured directory holds files whose names embed the tile
//! identifier, described by a pattern such as `C_{tile}.LAZ`. Matching is
//! case-insensitive and identifiers are lower-cased. When several
//! directories provide a file for the same tile, the lowest priority number
//! wins; directories sharing a priority contribute all their files.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tp_common::{Error, Result, TileId};
use tracing::{debug, info};

/// The placeholder a file pattern must contain.
pub const TILE_PLACEHOLDER: &str = "{tile}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryPattern {
    pub file_pattern: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    1
}

impl DirectoryPattern {
    pub fn new(file_pattern: &str, priority: u32) -> Self {
        DirectoryPattern {
            file_pattern: file_pattern.to_string(),
            priority,
        }
    }

    /// Anchored, case-insensitive regex capturing the tile part of a file name.
    pub fn regex(&self) -> Result<Regex> {
        let (pre, post) = self.file_pattern.split_once(TILE_PLACEHOLDER).ok_or_else(|| {
            Error::config(format!(
                "file pattern '{}' does not contain {}",
                self.file_pattern, TILE_PLACEHOLDER
            ))
        })?;
        let pattern = format!("^{}(?P<tile>.+?){}$", regex::escape(pre), regex::escape(post));
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::config(format!("invalid file pattern '{}': {}", self.file_pattern, e)))
    }

    /// Tile identifier embedded in `file_name`, lower-cased.
    pub fn tile_of(regex: &Regex, file_name: &str) -> Option<TileId> {
        regex
            .captures(file_name)
            .and_then(|c| c.name("tile"))
            .map(|m| TileId::normalized(m.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    files: HashMap<TileId, Vec<PathBuf>>,
}

impl FileIndex {
    /// Scan the directories and build the index.
    ///
    /// Directories must be absolute and exist. Only regular files directly in
    /// a directory are considered.
    pub fn build(directories: &[(PathBuf, DirectoryPattern)]) -> Result<Self> {
        let mut by_priority: BTreeMap<u32, HashMap<TileId, Vec<PathBuf>>> = BTreeMap::new();
        for (dir, pattern) in directories {
            let found = scan_directory(dir, pattern)?;
            let group = by_priority.entry(pattern.priority).or_default();
            for (tile, paths) in found {
                group.entry(tile).or_default().extend(paths);
            }
        }

        // Ascending priority number: the first group to provide a tile wins.
        let mut files: HashMap<TileId, Vec<PathBuf>> = HashMap::new();
        for (_, group) in by_priority {
            for (tile, mut paths) in group {
                if !files.contains_key(&tile) {
                    paths.sort();
                    files.insert(tile, paths);
                }
            }
        }
        info!(tiles = files.len(), directories = directories.len(), "built elevation file index");
        Ok(FileIndex { files })
    }

    pub fn from_files(files: HashMap<TileId, Vec<PathBuf>>) -> Self {
        FileIndex { files }
    }

    /// Files for `tile`, looked up by its normalised identifier.
    pub fn files(&self, tile: &TileId) -> &[PathBuf] {
        self.files
            .get(&tile.to_normalized())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn scan_directory(dir: &Path, pattern: &DirectoryPattern) -> Result<HashMap<TileId, Vec<PathBuf>>> {
    if !dir.is_absolute() {
        return Err(Error::config(format!(
            "elevation directory must be an absolute path: {}",
            dir.display()
        )));
    }
    let regex = pattern.regex()?;
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::config(format!("cannot read elevation directory {}: {}", dir.display(), e))
    })?;

    let mut found: HashMap<TileId, Vec<PathBuf>> = HashMap::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(tile) = DirectoryPattern::tile_of(&regex, name) {
            found.entry(tile).or_default().push(entry.path());
        }
    }
    debug!(dir = %dir.display(), tiles = found.len(), priority = pattern.priority, "scanned directory");
    Ok(found)
}
