//! Local disk implementation of the file system capability

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::traits::{FileSystem, FileSystemError};

/// File system backed by the local disk.
///
/// New files are written to a temporary file next to the destination and
/// then linked into place without clobbering, so readers either see the
/// complete file or nothing.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, source: std::io::Error) -> FileSystemError {
    FileSystemError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn location_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn combine(&self, directory: &Path, file_name: &str) -> PathBuf {
        directory.join(file_name)
    }

    fn file_name_of(&self, path: &Path) -> Option<String> {
        path.file_name().map(|name| name.to_string_lossy().into_owned())
    }

    fn create_file(&self, contents: &[u8], destination: &Path) -> Result<(), FileSystemError> {
        if destination.exists() {
            return Err(FileSystemError::AlreadyExists(destination.to_path_buf()));
        }

        let directory = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !directory.is_dir() {
            return Err(FileSystemError::NotFound(directory.to_path_buf()));
        }

        let mut staged = NamedTempFile::new_in(directory).map_err(|e| io_error(directory, e))?;
        staged
            .write_all(contents)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| io_error(staged.path(), e))?;

        staged.persist_noclobber(destination).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                FileSystemError::AlreadyExists(destination.to_path_buf())
            } else {
                io_error(destination, e.error)
            }
        })?;

        tracing::debug!(path = %destination.display(), bytes = contents.len(), "Created file");
        Ok(())
    }
}
