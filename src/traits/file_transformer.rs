//! Transformation capability applied to every detected file

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),
    #[error("Invalid transformation rules: {0}")]
    InvalidRules(String),
    #[error("Input is not valid UTF-8: {0}")]
    Encoding(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transformation failed: {0}")]
    Failed(String),
}

/// Trait for file transformers
///
/// Implementations that need costly setup (compiling a program, loading a
/// stylesheet) do it lazily and at most once, and must be callable from many
/// threads at the same time.
#[cfg_attr(test, mockall::automock)]
pub trait FileTransformer: Send + Sync {
    /// Transform `input` and append the result to `output`.
    ///
    /// On error the caller discards `output`.
    fn transform(&self, input: &Path, output: &mut Vec<u8>) -> Result<(), TransformError>;
}
