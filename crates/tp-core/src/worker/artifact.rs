//! Job configuration files that live exactly as long as the job.

use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// A file written on creation and removed on drop.
///
/// Dropping happens on every exit path of the enclosing scope, including
/// early returns and unwinding. Failures to write or remove the file are
/// logged and otherwise ignored; the job outcome decides the tile result.
#[derive(Debug)]
pub struct ScopedArtifact {
    path: PathBuf,
}

impl ScopedArtifact {
    pub fn write(path: PathBuf, contents: &str) -> Self {
        match std::fs::write(&path, contents) {
            Ok(()) => debug!(path = %path.display(), "wrote job configuration"),
            Err(e) => error!(path = %path.display(), error = %e, "cannot write job configuration"),
        }
        ScopedArtifact { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed job configuration"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(path = %self.path.display(), error = %e, "cannot remove job configuration"),
        }
    }
}
