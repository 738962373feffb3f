use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::MirrorError;

/// Writes pages and assets into the mirror tree, creating directories on demand.
/// Paths handed to it are mirror-relative and `/`-separated, as produced by the
/// path mapper.
#[derive(Debug, Clone)]
pub struct FileManager {
    base_dir: PathBuf,
}

impl FileManager {
    pub fn new(base_dir: &Path) -> Result<Self> {
        let base_dir = base_dir.to_path_buf();
        fs::create_dir_all(&base_dir)
            .with_context(|| format!("Failed to create base directory: {:?}", base_dir))?;

        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute location of a mirror-relative path. `..` segments are dropped so
    /// nothing lands outside the mirror root.
    pub fn resolve(&self, local_path: &str) -> PathBuf {
        let mut path = self.base_dir.clone();
        for segment in local_path
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        {
            path.push(segment);
        }
        path
    }

    pub fn save_file(&self, local_path: &str, content: &[u8]) -> Result<PathBuf, MirrorError> {
        let file_path = self.resolve(local_path);
        let write_failed = |source| MirrorError::WriteFailed {
            path: file_path.clone(),
            source,
        };

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let mut file = fs::File::create(&file_path).map_err(write_failed)?;
        file.write_all(content).map_err(write_failed)?;

        Ok(file_path)
    }

    /// Size of an existing non-empty file at `local_path`. Zero-length files
    /// are left over from interrupted writes and do not count.
    pub fn existing_size(&self, local_path: &str) -> Option<u64> {
        fs::metadata(self.resolve(local_path))
            .ok()
            .filter(|meta| meta.is_file() && meta.len() > 0)
            .map(|meta| meta.len())
    }

    pub fn read_file(&self, local_path: &str) -> Option<Vec<u8>> {
        fs::read(self.resolve(local_path)).ok()
    }
}
