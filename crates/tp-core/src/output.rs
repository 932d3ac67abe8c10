//! Where workers put their results.
//!
//! The engine only builds destinations: a path inside an output directory or
//! a DSN pointing at a database table. Writing is left to the executables.

use std::path::{Path, PathBuf};
use tp_common::{DbParams, Result};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    Directory(DirOutput),
    Database(DbOutput),
}

/// An output directory, created on construction when missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirOutput {
    path: PathBuf,
}

impl DirOutput {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        if path.is_dir() {
            debug!(path = %path.display(), "output directory already exists");
        } else {
            std::fs::create_dir_all(&path)?;
            info!(path = %path.display(), "created output directory");
        }
        Ok(DirOutput { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }
}

/// A database destination rendered as an OGR PostGIS DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbOutput {
    params: DbParams,
    schema: Option<String>,
    table: Option<String>,
}

impl DbOutput {
    pub fn new(params: DbParams, schema: Option<String>, table: Option<String>) -> Self {
        DbOutput { params, schema, table }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// `PG:dbname=.. host=.. port=.. user=.. [password=..] [schemas=..] [tables=..]`
    pub fn dsn(&self) -> String {
        let mut dsn = self.params.dsn();
        if let Some(schema) = &self.schema {
            dsn.push_str(&format!(" schemas={}", schema));
        }
        if let Some(table) = &self.table {
            dsn.push_str(&format!(" tables={}", table));
        }
        dsn
    }

    /// The DSN with its table replaced by `table`, qualified by the schema
    /// when one is set.
    pub fn with_table(&self, table: &str) -> String {
        let qualified = match &self.schema {
            Some(schema) => format!("{}.{}", schema, table),
            None => table.to_string(),
        };
        let mut dsn = self.params.dsn();
        if let Some(schema) = &self.schema {
            dsn.push_str(&format!(" schemas={}", schema));
        }
        dsn.push_str(&format!(" tables={}", qualified));
        dsn
    }
}
