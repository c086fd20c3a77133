//! Directory watcher on top of `notify`
//!
//! Raw notifications are debounced, reduced to "a file appeared at this path"
//! (created, or renamed into place) and filtered by a glob on the file name.
//! Every detection then goes through the lock-retry gate on its own thread
//! before the handler sees it.
//!
//! The gate exists because the OS can report a new file while the producer
//! still has it open. Probing and waiting a bounded amount of time lowers the
//! failure rate of that race; it does not remove it. A file that is still
//! locked once the budget runs out is handed to the handler anyway, so the
//! failure shows up downstream instead of the file being dropped.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use globset::{GlobBuilder, GlobMatcher};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer_opt, DebounceEventResult, Debouncer, FileIdMap};

use crate::traits::{
    FileDetectedHandler, FileEvent, FileEventKind, FileWatcher, FileWatcherError, HandlerSlot,
};

const DEFAULT_FILTER: &str = "*";
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded wait-and-reprobe policy for files that may still be held open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRetry {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for LockRetry {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_millis(100),
        }
    }
}

impl LockRetry {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Probe `path` until `is_locked` reports it free or the budget is spent.
    ///
    /// Returns whether the file was seen unlocked. Sleeps at most
    /// `attempts * interval`.
    pub fn wait_until_unlocked<F>(&self, path: &Path, mut is_locked: F) -> bool
    where
        F: FnMut(&Path) -> bool,
    {
        for attempt in 1..=self.attempts {
            if !is_locked(path) {
                return true;
            }
            tracing::debug!(
                path = %path.display(),
                attempt,
                max_attempts = self.attempts,
                "File still locked, waiting"
            );
            thread::sleep(self.interval);
        }
        !is_locked(path)
    }
}

/// Whether `path` cannot be opened for exclusive read+write access.
///
/// A missing file also counts as locked. On Windows the open requests no
/// sharing, so a handle held by the producer makes it fail; elsewhere this
/// only catches files that are missing or not writable yet.
pub fn is_file_locked(path: &Path) -> bool {
    let mut options = OpenOptions::new();
    options.read(true).write(true);
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        options.share_mode(0);
    }
    options.open(path).is_err()
}

/// Construction parameters for [`NotifyFileWatcher`]
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub directory: PathBuf,
    /// Glob matched against the file name, e.g. `*.xml`
    pub filter: String,
    pub recursive: bool,
    pub lock_retry: LockRetry,
    pub debounce: Duration,
}

impl WatcherOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            filter: DEFAULT_FILTER.to_string(),
            recursive: false,
            lock_retry: LockRetry::default(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_lock_retry(mut self, lock_retry: LockRetry) -> Self {
        self.lock_retry = lock_retry;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Compile a file-name filter. `*.*` and the empty pattern match everything.
pub(crate) fn build_filter(pattern: &str) -> Result<GlobMatcher, FileWatcherError> {
    let normalized = match pattern.trim() {
        "" | "*.*" => DEFAULT_FILTER,
        other => other,
    };
    GlobBuilder::new(normalized)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| FileWatcherError::InvalidFilter {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn matches_filter(path: &Path, filter: &GlobMatcher) -> bool {
    path.file_name()
        .map(|name| filter.is_match(Path::new(name)))
        .unwrap_or(false)
}

/// Reduce one batch of raw notifications to the files that appeared.
///
/// Paths renamed away inside the batch are dropped and every path is
/// reported once, so "create temp name, rename to final name" yields a
/// single detection at the final name.
pub(crate) fn detect_files(events: &[Event], filter: &GlobMatcher) -> Vec<FileEvent> {
    let mut renamed_away: HashSet<PathBuf> = HashSet::new();
    let mut candidates: Vec<(PathBuf, FileEventKind)> = Vec::new();

    for event in events {
        match event.kind {
            EventKind::Create(CreateKind::Folder) => {}
            EventKind::Create(_) => {
                if let Some(path) = event.paths.first() {
                    candidates.push((path.clone(), FileEventKind::Created));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                renamed_away.extend(event.paths.first().cloned());
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if let Some(path) = event.paths.first() {
                    candidates.push((path.clone(), FileEventKind::Renamed { from: None }));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    renamed_away.insert(from.clone());
                    candidates.push((
                        to.clone(),
                        FileEventKind::Renamed {
                            from: Some(from.clone()),
                        },
                    ));
                }
            }
            // Backends that cannot tell the two sides of a rename apart
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if path.exists() {
                        candidates.push((path.clone(), FileEventKind::Renamed { from: None }));
                    } else {
                        renamed_away.insert(path.clone());
                    }
                }
            }
            _ => {}
        }
    }

    let mut seen: HashSet<PathBuf> = HashSet::new();
    candidates
        .into_iter()
        .filter(|(path, _)| !renamed_away.contains(path))
        .filter(|(path, _)| matches_filter(path, filter) && !path.is_dir())
        .filter(|(path, _)| seen.insert(path.clone()))
        .map(|(path, kind)| FileEvent {
            path,
            kind,
            timestamp: chrono::Utc::now(),
        })
        .collect()
}

/// Run the lock-retry gate for one detection, then hand it to the handler.
fn deliver(event: FileEvent, lock_retry: LockRetry, enabled: &AtomicBool, handler: &HandlerSlot) {
    if !lock_retry.wait_until_unlocked(&event.path, is_file_locked) {
        tracing::warn!(
            path = %event.path.display(),
            attempts = lock_retry.attempts,
            "File still locked after retry budget, handing off anyway"
        );
    }

    // Disabled or disposed while we were waiting
    if !enabled.load(Ordering::Acquire) {
        tracing::debug!(path = %event.path.display(), "Watcher disabled, dropping detection");
        return;
    }

    let handler = lock(handler).clone();
    if let Some(handler) = handler {
        tracing::debug!(path = %event.path.display(), kind = ?event.kind, "File detected");
        handler(event.path);
    }
}

fn dispatch_loop(
    rx: Receiver<DebounceEventResult>,
    filter: GlobMatcher,
    lock_retry: LockRetry,
    enabled: Arc<AtomicBool>,
    enabled_since: Arc<Mutex<Instant>>,
    handler: HandlerSlot,
) {
    for result in rx {
        match result {
            Ok(events) => {
                if !enabled.load(Ordering::Acquire) {
                    tracing::trace!(count = events.len(), "Watcher disabled, ignoring events");
                    continue;
                }
                // Drop events that happened before the current enable period
                let since = *lock(&enabled_since);
                let raw: Vec<Event> = events
                    .into_iter()
                    .filter(|e| e.time >= since)
                    .map(|e| e.event)
                    .collect();
                for event in detect_files(&raw, &filter) {
                    let enabled = Arc::clone(&enabled);
                    let handler = Arc::clone(&handler);
                    let path = event.path.clone();
                    let spawned = thread::Builder::new()
                        .name("fileflow-detect".into())
                        .spawn(move || deliver(event, lock_retry, &enabled, &handler));
                    if let Err(e) = spawned {
                        tracing::error!(
                            path = %path.display(),
                            error = %e,
                            "Failed to spawn detection worker"
                        );
                    }
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::error!("Watch error: {:?}", error);
                }
            }
        }
    }
    tracing::debug!("Watcher dispatch loop finished");
}

/// The debouncer and whether the OS watch is attached to it
struct WatchSlot {
    debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    attached: bool,
}

/// Production watcher for one directory
///
/// The OS watch is attached on the first enable and stays attached until
/// disposal. Disabling only flips the `enabled` flag; the dispatch loop and
/// the detection workers check it before anything reaches the handler.
pub struct NotifyFileWatcher {
    options: WatcherOptions,
    slot: Mutex<WatchSlot>,
    enabled: Arc<AtomicBool>,
    enabled_since: Arc<Mutex<Instant>>,
    disposed: AtomicBool,
    handler: HandlerSlot,
}

impl NotifyFileWatcher {
    /// Create a disabled watcher. Fails if the directory is empty or missing.
    pub fn new(options: WatcherOptions) -> Result<Self, FileWatcherError> {
        if options.directory.as_os_str().is_empty() {
            return Err(FileWatcherError::InvalidPath);
        }
        if !options.directory.is_dir() {
            return Err(FileWatcherError::PathNotFound(options.directory));
        }
        let filter = build_filter(&options.filter)?;

        let (tx, rx) = std::sync::mpsc::channel();
        let enabled = Arc::new(AtomicBool::new(false));
        let enabled_since = Arc::new(Mutex::new(Instant::now()));
        let handler: HandlerSlot = Arc::new(Mutex::new(None));

        let debouncer = new_debouncer_opt::<_, RecommendedWatcher, FileIdMap>(
            options.debounce,
            None,
            tx,
            FileIdMap::new(),
            notify::Config::default(),
        )
        .map_err(|e| FileWatcherError::WatchError(e.to_string()))?;

        {
            let enabled = Arc::clone(&enabled);
            let enabled_since = Arc::clone(&enabled_since);
            let handler = Arc::clone(&handler);
            let lock_retry = options.lock_retry;
            thread::Builder::new()
                .name("fileflow-watch".into())
                .spawn(move || {
                    dispatch_loop(rx, filter, lock_retry, enabled, enabled_since, handler)
                })
                .map_err(|e| FileWatcherError::WatchError(e.to_string()))?;
        }

        tracing::debug!(
            directory = %options.directory.display(),
            filter = %options.filter,
            recursive = options.recursive,
            "File watcher created"
        );

        Ok(Self {
            options,
            slot: Mutex::new(WatchSlot {
                debouncer: Some(debouncer),
                attached: false,
            }),
            enabled,
            enabled_since,
            disposed: AtomicBool::new(false),
            handler,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.options.directory
    }

    fn recursive_mode(&self) -> RecursiveMode {
        if self.options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        }
    }
}

impl FileWatcher for NotifyFileWatcher {
    fn set_enabled(&self, enabled: bool) -> Result<(), FileWatcherError> {
        let mut guard = lock(&self.slot);
        let directory = &self.options.directory;

        if !enabled {
            if self.enabled.swap(false, Ordering::AcqRel) {
                tracing::info!("Stopped watching directory: {:?}", directory);
            }
            return Ok(());
        }
        if self.enabled.load(Ordering::Acquire) {
            return Ok(());
        }

        let slot = &mut *guard;
        let Some(debouncer) = slot.debouncer.as_mut() else {
            return Err(FileWatcherError::WatchError("watcher has been disposed".into()));
        };
        if !slot.attached {
            debouncer
                .watch(directory, self.recursive_mode())
                .map_err(|e| FileWatcherError::WatchError(e.to_string()))?;
            slot.attached = true;
        }

        *lock(&self.enabled_since) = Instant::now();
        self.enabled.store(true, Ordering::Release);
        tracing::info!("Watching directory: {:?}", directory);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_file_detected_handler(&self, handler: FileDetectedHandler) {
        *lock(&self.handler) = Some(handler);
        tracing::debug!("File detected handler set");
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enabled.store(false, Ordering::Release);
        lock(&self.handler).take();
        // Dropping the debouncer detaches from the OS and ends the dispatch loop
        let debouncer = lock(&self.slot).debouncer.take();
        drop(debouncer);
        tracing::debug!(directory = %self.options.directory.display(), "File watcher disposed");
    }
}

impl Drop for NotifyFileWatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}
