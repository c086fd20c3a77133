//! Test doubles for dependency injection
//!
//! Provides in-memory implementations of all capabilities for isolated testing.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::traits::{
    FileDetectedHandler, FileSystem, FileSystemError, FileTransformer, FileWatcher,
    FileWatcherError, TransformError,
};

// ============================================================================
// ManualFileWatcher
// ============================================================================

/// Manual file watcher for testing
///
/// Does not actually watch the file system. Tests call methods directly to
/// simulate detections.
#[derive(Clone, Default)]
pub struct ManualFileWatcher {
    enabled: Arc<Mutex<bool>>,
    disposed: Arc<Mutex<bool>>,
    enable_calls: Arc<Mutex<usize>>,
    dispose_calls: Arc<Mutex<usize>>,
    handler: Arc<Mutex<Option<FileDetectedHandler>>>,
}

impl ManualFileWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of disabled → enabled transitions
    pub fn enable_calls(&self) -> usize {
        *self.enable_calls.lock().unwrap()
    }

    /// Number of `dispose` calls, including repeated ones
    pub fn dispose_calls(&self) -> usize {
        *self.dispose_calls.lock().unwrap()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    /// Simulate a detection. Dropped unless enabled, like the real watcher.
    pub fn simulate_event(&self, path: PathBuf) {
        if *self.enabled.lock().unwrap() {
            self.force_event(path);
        }
    }

    /// Deliver a detection regardless of the enabled flag, as an event the
    /// OS queued just before the watcher was disabled would be.
    pub fn force_event(&self, path: PathBuf) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(path);
        }
    }
}

impl FileWatcher for ManualFileWatcher {
    fn set_enabled(&self, enabled: bool) -> Result<(), FileWatcherError> {
        if enabled && *self.disposed.lock().unwrap() {
            return Err(FileWatcherError::WatchError("watcher has been disposed".into()));
        }
        let mut current = self.enabled.lock().unwrap();
        if enabled && !*current {
            *self.enable_calls.lock().unwrap() += 1;
        }
        *current = enabled;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap()
    }

    fn set_file_detected_handler(&self, handler: FileDetectedHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn dispose(&self) {
        *self.dispose_calls.lock().unwrap() += 1;
        *self.disposed.lock().unwrap() = true;
        *self.enabled.lock().unwrap() = false;
        self.handler.lock().unwrap().take();
    }
}

// ============================================================================
// InMemoryFileSystem
// ============================================================================

/// In-memory file system for testing
///
/// Thread-safe storage backed by HashMap. Honors the no-overwrite contract.
#[derive(Clone, Default)]
pub struct InMemoryFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    directories: Arc<Mutex<HashSet<PathBuf>>>,
    fail_writes: Arc<Mutex<Option<String>>>,
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create file system with pre-existing directories
    pub fn with_directories(directories: &[&str]) -> Self {
        let fs = Self::new();
        for dir in directories {
            fs.add_directory(*dir);
        }
        fs
    }

    pub fn add_directory(&self, path: impl Into<PathBuf>) {
        self.directories.lock().unwrap().insert(path.into());
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), contents.to_vec());
    }

    /// Make every subsequent `create_file` fail with an IO error
    pub fn fail_writes(&self, message: &str) {
        *self.fail_writes.lock().unwrap() = Some(message.to_string());
    }

    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// All stored file paths (for assertions)
    pub fn files(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }
}

impl FileSystem for InMemoryFileSystem {
    fn exists(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn location_exists(&self, path: &Path) -> bool {
        self.directories.lock().unwrap().contains(path)
    }

    fn combine(&self, directory: &Path, file_name: &str) -> PathBuf {
        directory.join(file_name)
    }

    fn file_name_of(&self, path: &Path) -> Option<String> {
        path.file_name().map(|name| name.to_string_lossy().into_owned())
    }

    fn create_file(&self, contents: &[u8], destination: &Path) -> Result<(), FileSystemError> {
        if let Some(message) = self.fail_writes.lock().unwrap().clone() {
            return Err(FileSystemError::Io {
                path: destination.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, message),
            });
        }

        let mut files = self.files.lock().unwrap();
        if files.contains_key(destination) {
            return Err(FileSystemError::AlreadyExists(destination.to_path_buf()));
        }
        files.insert(destination.to_path_buf(), contents.to_vec());
        Ok(())
    }
}

// ============================================================================
// RecordedTransformer
// ============================================================================

/// Behavior configuration for the recorded transformer
#[derive(Clone)]
pub enum TransformBehavior {
    /// Always write these bytes
    Echo(Vec<u8>),
    /// Always fail with `TransformError::Failed`
    AlwaysFail(String),
    /// Custom result based on the input path
    Custom(Arc<dyn Fn(&Path, &mut Vec<u8>) -> Result<(), TransformError> + Send + Sync>),
}

/// Recorded transformer for testing
///
/// Records every input path and produces configurable output.
#[derive(Clone)]
pub struct RecordedTransformer {
    calls: Arc<Mutex<Vec<PathBuf>>>,
    behavior: Arc<Mutex<TransformBehavior>>,
}

impl RecordedTransformer {
    pub fn new(behavior: TransformBehavior) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            behavior: Arc::new(Mutex::new(behavior)),
        }
    }

    /// Always succeed with the given output
    pub fn echo(output: impl Into<Vec<u8>>) -> Self {
        Self::new(TransformBehavior::Echo(output.into()))
    }

    /// Always fail with the given message
    pub fn always_fail(message: &str) -> Self {
        Self::new(TransformBehavior::AlwaysFail(message.to_string()))
    }

    /// Change the output for subsequent calls
    pub fn set_output(&self, output: impl Into<Vec<u8>>) {
        *self.behavior.lock().unwrap() = TransformBehavior::Echo(output.into());
    }

    pub fn set_behavior(&self, behavior: TransformBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Input paths in call order
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl FileTransformer for RecordedTransformer {
    fn transform(&self, input: &Path, output: &mut Vec<u8>) -> Result<(), TransformError> {
        self.calls.lock().unwrap().push(input.to_path_buf());

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            TransformBehavior::Echo(bytes) => {
                output.extend_from_slice(&bytes);
                Ok(())
            }
            TransformBehavior::AlwaysFail(message) => Err(TransformError::Failed(message)),
            TransformBehavior::Custom(func) => func(input, output),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
