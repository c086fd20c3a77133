//! Trait definitions for dependency injection
//!
//! The processor only talks to the outside world through these capabilities,
//! so every one of them has a production implementation and a test double.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

mod file_system;
mod file_transformer;
mod file_watcher;

pub use file_system::{FileSystem, FileSystemError};
pub use file_transformer::{FileTransformer, TransformError};
pub use file_watcher::{FileEvent, FileEventKind, FileWatcher, FileWatcherError};

#[cfg(test)]
pub use file_system::MockFileSystem;
#[cfg(test)]
pub use file_transformer::MockFileTransformer;
#[cfg(test)]
pub use file_watcher::MockFileWatcher;

/// Callback invoked with the path of every detected file
pub type FileDetectedHandler = Arc<dyn Fn(PathBuf) + Send + Sync>;

/// Shared detection handler slot used by file watchers
pub type HandlerSlot = Arc<Mutex<Option<FileDetectedHandler>>>;
