//! Production implementations of traits

mod file_system;
mod file_watcher;
mod regex_transformer;

pub use file_system::LocalFileSystem;
pub use file_watcher::{is_file_locked, LockRetry, NotifyFileWatcher, WatcherOptions};
pub use regex_transformer::{RegexTransformer, RewriteRule, RuleSet};
