//! File system capability used by the processor to persist output

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileSystemError {
    #[error("File already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("Location not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Trait for file system access
///
/// Production: local disk via `std::fs` and `tempfile`
/// Testing: in-memory map of paths to bytes
#[cfg_attr(test, mockall::automock)]
pub trait FileSystem: Send + Sync {
    /// Whether a file exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Whether a directory exists at `path`
    fn location_exists(&self, path: &Path) -> bool;

    /// Join a directory and a file name
    fn combine(&self, directory: &Path, file_name: &str) -> PathBuf;

    /// Final component of `path`, if it has one
    fn file_name_of(&self, path: &Path) -> Option<String>;

    /// Create `destination` holding `contents`.
    ///
    /// Fails with [`FileSystemError::AlreadyExists`] instead of overwriting, and
    /// never leaves a partially written file visible at `destination`.
    fn create_file(&self, contents: &[u8], destination: &Path) -> Result<(), FileSystemError>;
}
