//! Capture-scoped scratch files for render backend output

use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

/// Allocates scratch files under one root directory
///
/// Each capture gets its own subdirectory, so files are never shared between
/// requests.
#[derive(Debug, Clone)]
pub struct ScratchStorage {
    root: PathBuf,
}

impl ScratchStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve an output path for one backend run of one capture.
    ///
    /// Any stale file left at that path by a crashed run is removed first.
    pub async fn allocate(
        &self,
        capture_id: Uuid,
        backend: &str,
        extension: &str,
    ) -> std::io::Result<ScratchFile> {
        let dir = self.root.join(capture_id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(format!("{backend}.{extension}"));
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }

        Ok(ScratchFile { path, dir })
    }
}

/// A scratch file that is deleted when dropped
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    dir: PathBuf,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file contents; `None` if missing or empty
    pub async fn read(&self) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(data) if data.is_empty() => Ok(None),
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove scratch file {}: {}", self.path.display(), e);
            }
        }
        // Only succeeds once the last backend file for this capture is gone.
        let _ = std::fs::remove_dir(&self.dir);
    }
}
