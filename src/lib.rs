//! fileflow - Watch a directory, transform new files, write the results
//!
//! This library provides the core functionality for fileflow, organized around
//! trait-based dependency injection for testability.

pub mod config;
pub mod mocks;
pub mod processor;
pub mod production;
pub mod traits;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::AppConfig;
pub use processor::{FileProcessor, OutputLocation, ProcessError, ProcessedFile, ProcessorError};

/// Initialize logging to stdout and, when `log_dir` is given, to a daily file.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the program.
pub fn init_logging(log_dir: Option<&Path>) -> std::io::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "fileflow=info,fileflow_lib=info".into()),
    );

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, "fileflow.log"));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(file_layer)
        .init();

    Ok(guard)
}
