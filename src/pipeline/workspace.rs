use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Private scratch directory for one pipeline run. Removed when dropped,
/// whichever way the run ends.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create under `parent`, or the system temp dir when `None`.
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("podcast-run-");
        let dir = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Directory for per-segment audio, created on first use.
    pub fn segments_dir(&self) -> io::Result<PathBuf> {
        let dir = self.dir.path().join("segments");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
