//! File Processor - lifecycle and transform pipeline
//!
//! The FileProcessor wires the watcher's detections to the transformer and the
//! file system. Start and Stop share one lifecycle lock so concurrent callers
//! see exactly one transition and observers fire once per transition. The lock
//! is reentrant, so observers may call back into the processor. The
//! pipeline itself never takes that lock across a transform or a write, and
//! detections for different files run in parallel.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::traits::{
    FileSystem, FileSystemError, FileTransformer, FileWatcher, FileWatcherError, TransformError,
};

/// Configuration errors, raised synchronously by lifecycle calls
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("No output location configured")]
    OutputLocationNotSet,
    #[error("Output directory not found: {0}")]
    OutputDirectoryNotFound(PathBuf),
    #[error("Output location cannot change while the processor is running")]
    AlreadyRunning,
    #[error("Processor has been disposed")]
    Disposed,
    #[error("Watcher error: {0}")]
    Watcher(#[from] FileWatcherError),
}

/// The step of the pipeline that failed for one file
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No output location configured")]
    NoOutputLocation,
    #[error("No output file name could be derived")]
    NoFileName,
    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("Write failed: {0}")]
    Persist(#[from] FileSystemError),
}

/// A per-file failure delivered to error observers
#[derive(Debug, thiserror::Error)]
#[error("Error processing file '{}'", .input.display())]
pub struct ProcessError {
    pub input: PathBuf,
    #[source]
    pub source: PipelineError,
}

/// One completed pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFile {
    pub input: PathBuf,
    pub output: PathBuf,
    pub processed_at: DateTime<Utc>,
}

/// Maps an input path to the output file name
pub type NamingConvention = Arc<dyn Fn(&Path) -> String + Send + Sync>;

/// Where transformed files are written
#[derive(Clone)]
pub struct OutputLocation {
    pub directory: PathBuf,
    /// `None` keeps the input's file name
    pub naming: Option<NamingConvention>,
}

impl OutputLocation {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            naming: None,
        }
    }

    pub fn with_naming<F>(mut self, naming: F) -> Self
    where
        F: Fn(&Path) -> String + Send + Sync + 'static,
    {
        self.naming = Some(Arc::new(naming));
        self
    }

    /// Keep the input's file stem and swap the extension, e.g. `books.xml` → `books.html`
    pub fn with_extension(self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.').to_string();
        self.with_naming(move |path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if extension.is_empty() {
                stem
            } else {
                format!("{}.{}", stem, extension)
            }
        })
    }
}

impl std::fmt::Debug for OutputLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLocation")
            .field("directory", &self.directory)
            .field("naming", &self.naming.as_ref().map(|_| "custom"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
}

#[derive(Debug)]
struct Lifecycle {
    state: LifecycleState,
    disposed: bool,
}

type Callback = Arc<dyn Fn() + Send + Sync>;
type FileProcessedCallback = Arc<dyn Fn(&ProcessedFile) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ProcessError) + Send + Sync>;

/// Subscribers for each notification point
#[derive(Default)]
struct Observers {
    started: RwLock<Vec<Callback>>,
    stopped: RwLock<Vec<Callback>>,
    file_processed: RwLock<Vec<FileProcessedCallback>>,
    error: RwLock<Vec<ErrorCallback>>,
}

/// Clone the subscriber list so callbacks run without the list locked
fn snapshot<T: Clone>(list: &RwLock<Vec<T>>) -> Vec<T> {
    list.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn subscribe<T>(list: &RwLock<Vec<T>>, callback: T) {
    list.write()
        .unwrap_or_else(PoisonError::into_inner)
        .push(callback);
}

struct Inner {
    watcher: Arc<dyn FileWatcher>,
    transformer: Arc<dyn FileTransformer>,
    file_system: Arc<dyn FileSystem>,
    output: RwLock<Option<Arc<OutputLocation>>>,
    lifecycle: ReentrantMutex<RefCell<Lifecycle>>,
    watcher_disposed: AtomicBool,
    observers: Observers,
}

/// Watches for files and runs each one through transform-and-write
pub struct FileProcessor {
    inner: Arc<Inner>,
}

impl FileProcessor {
    /// Create a stopped processor and subscribe it to the watcher's detections
    pub fn new(
        transformer: Arc<dyn FileTransformer>,
        watcher: Arc<dyn FileWatcher>,
        file_system: Arc<dyn FileSystem>,
    ) -> Self {
        let inner = Arc::new(Inner {
            watcher,
            transformer,
            file_system,
            output: RwLock::new(None),
            lifecycle: ReentrantMutex::new(RefCell::new(Lifecycle {
                state: LifecycleState::Stopped,
                disposed: false,
            })),
            watcher_disposed: AtomicBool::new(false),
            observers: Observers::default(),
        });

        // Weak so the watcher's handler does not keep the processor alive
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.watcher.set_file_detected_handler(Arc::new(move |path: PathBuf| {
            if let Some(inner) = weak.upgrade() {
                inner.process_file(&path);
            }
        }));

        Self { inner }
    }

    /// Set where output goes. Rejected while running.
    pub fn set_output_location(&self, location: OutputLocation) -> Result<(), ProcessorError> {
        let guard = self.inner.lifecycle();
        let lifecycle = guard.borrow();
        if lifecycle.disposed {
            return Err(ProcessorError::Disposed);
        }
        if lifecycle.state == LifecycleState::Running {
            return Err(ProcessorError::AlreadyRunning);
        }
        *self
            .inner
            .output
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(location));
        Ok(())
    }

    pub fn output_location(&self) -> Option<OutputLocation> {
        self.inner.output_location().map(|location| (*location).clone())
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lifecycle().borrow().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Start raising detections. A no-op when already running.
    pub fn start(&self) -> Result<(), ProcessorError> {
        self.inner.start()
    }

    /// Stop raising detections. A no-op when already stopped.
    /// Pipelines already in flight run to completion.
    pub fn stop(&self) {
        self.inner.stop()
    }

    /// Stop if running and dispose the watcher. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.inner.dispose()
    }

    /// Run one file through the pipeline as if the watcher had detected it
    pub fn process_file(&self, path: &Path) {
        self.inner.process_file(path)
    }

    /// Observers run on the thread that performed the transition, with the
    /// lifecycle lock held. Calls back into this processor from that thread
    /// are allowed; blocking on another thread that does so is a deadlock.
    pub fn on_started<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        subscribe(&self.inner.observers.started, Arc::new(callback) as Callback);
    }

    pub fn on_stopped<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        subscribe(&self.inner.observers.stopped, Arc::new(callback) as Callback);
    }

    pub fn on_file_processed<F>(&self, callback: F)
    where
        F: Fn(&ProcessedFile) + Send + Sync + 'static,
    {
        subscribe(
            &self.inner.observers.file_processed,
            Arc::new(callback) as FileProcessedCallback,
        );
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&ProcessError) + Send + Sync + 'static,
    {
        subscribe(&self.inner.observers.error, Arc::new(callback) as ErrorCallback);
    }
}

impl Drop for FileProcessor {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl Inner {
    fn lifecycle(&self) -> ReentrantMutexGuard<'_, RefCell<Lifecycle>> {
        self.lifecycle.lock()
    }

    fn output_location(&self) -> Option<Arc<OutputLocation>> {
        self.output
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn start(&self) -> Result<(), ProcessorError> {
        let guard = self.lifecycle();
        {
            let lifecycle = guard.borrow();
            if lifecycle.disposed {
                return Err(ProcessorError::Disposed);
            }
            if lifecycle.state == LifecycleState::Running {
                return Ok(());
            }
        }

        let location = self
            .output_location()
            .ok_or(ProcessorError::OutputLocationNotSet)?;
        if !self.file_system.location_exists(&location.directory) {
            return Err(ProcessorError::OutputDirectoryNotFound(
                location.directory.clone(),
            ));
        }

        self.watcher.set_enabled(true)?;
        guard.borrow_mut().state = LifecycleState::Running;
        tracing::info!(output = %location.directory.display(), "File processor started");

        // No RefCell borrow may be live here; observers can re-enter
        for callback in snapshot(&self.observers.started) {
            callback();
        }
        Ok(())
    }

    fn stop(&self) {
        let guard = self.lifecycle();
        self.stop_locked(&guard);
    }

    fn stop_locked(&self, lifecycle: &RefCell<Lifecycle>) {
        if lifecycle.borrow().state == LifecycleState::Stopped {
            return;
        }

        if let Err(e) = self.watcher.set_enabled(false) {
            tracing::warn!(error = %e, "Failed to disable watcher");
        }
        lifecycle.borrow_mut().state = LifecycleState::Stopped;
        tracing::info!("File processor stopped");

        for callback in snapshot(&self.observers.stopped) {
            callback();
        }
    }

    fn dispose(&self) {
        {
            let guard = self.lifecycle();
            self.stop_locked(&guard);
            guard.borrow_mut().disposed = true;
        }

        if !self.watcher_disposed.swap(true, Ordering::AcqRel) {
            self.watcher.dispose();
            tracing::debug!("File processor disposed");
        }
    }

    fn accepting(&self) -> bool {
        let guard = self.lifecycle();
        let lifecycle = guard.borrow();
        !lifecycle.disposed && lifecycle.state == LifecycleState::Running
    }

    fn process_file(&self, input: &Path) {
        if !self.accepting() {
            tracing::debug!(path = %input.display(), "Processor not running, ignoring file");
            return;
        }

        match self.run_pipeline(input) {
            Ok(record) => {
                tracing::info!(
                    input = %record.input.display(),
                    output = %record.output.display(),
                    "File processed"
                );
                for callback in snapshot(&self.observers.file_processed) {
                    callback(&record);
                }
            }
            Err(source) => {
                let error = ProcessError {
                    input: input.to_path_buf(),
                    source,
                };
                tracing::error!(
                    path = %input.display(),
                    error = %error.source,
                    "File processing failed"
                );
                for callback in snapshot(&self.observers.error) {
                    callback(&error);
                }
            }
        }
    }

    fn run_pipeline(&self, input: &Path) -> Result<ProcessedFile, PipelineError> {
        let location = self
            .output_location()
            .ok_or(PipelineError::NoOutputLocation)?;

        let file_name = match &location.naming {
            Some(naming) => Some(naming(input)),
            None => self.file_system.file_name_of(input),
        }
        .filter(|name| !name.is_empty())
        .ok_or(PipelineError::NoFileName)?;
        let output = self.file_system.combine(&location.directory, &file_name);

        let mut buffer = Vec::new();
        self.transformer.transform(input, &mut buffer)?;
        self.file_system.create_file(&buffer, &output)?;

        Ok(ProcessedFile {
            input: input.to_path_buf(),
            output,
            processed_at: Utc::now(),
        })
    }
}
