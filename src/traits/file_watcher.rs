//! File watching trait for detecting files dropped into a directory

use std::path::PathBuf;
use thiserror::Error;

use super::FileDetectedHandler;

#[derive(Debug, Error)]
pub enum FileWatcherError {
    #[error("Watch directory must not be empty")]
    InvalidPath,
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
    #[error("Invalid filter '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },
    #[error("Watch error: {0}")]
    WatchError(String),
}

/// A raw detection before the lock-retry gate
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileEventKind {
    Created,
    Renamed { from: Option<PathBuf> },
}

/// Trait for directory watching
///
/// Production: `notify` with a debouncer
/// Testing: manual event emission
#[cfg_attr(test, mockall::automock)]
pub trait FileWatcher: Send + Sync {
    /// Start (`true`) or stop (`false`) raising detections
    fn set_enabled(&self, enabled: bool) -> Result<(), FileWatcherError>;

    fn is_enabled(&self) -> bool;

    /// Replace the single detection subscriber
    fn set_file_detected_handler(&self, handler: FileDetectedHandler);

    /// Disable and detach from the notification source. Safe to call repeatedly.
    fn dispose(&self);
}
