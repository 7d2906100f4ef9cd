//! Error types and load result structures for the declaration loader.

use std::path::PathBuf;

/// Errors that abort a load or watch operation as a whole.
///
/// Problems inside a single declaration are not errors at this level; they
/// are reported per declaration through [`LoadStatus::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error for a whole document.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Filesystem watcher error.
    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Outcome of loading one declaration (or one skipped/broken file).
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// File the declaration came from.
    pub path: PathBuf,
    pub status: LoadStatus,
}

/// Status of a single load attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    /// Declaration expanded into `entities` specs.
    Loaded { slug: String, entities: usize },
    /// File was skipped (dotfile, non-YAML, etc.).
    Skipped { reason: String },
    /// Parse, validation or expansion error.
    Failed { slug: Option<String>, error: String },
}
