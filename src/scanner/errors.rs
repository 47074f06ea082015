use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while scanning an external root or a deployed tree.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A configured root exists but is not a directory.
    #[error("Scan root is not a directory: {0}")]
    InvalidRoot(PathBuf),
    /// Filesystem access failed while walking or reading a file.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

impl ScanError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
