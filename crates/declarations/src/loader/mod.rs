//! Filesystem declaration loader with hot-reload via `notify` watcher.
//!
//! Loads a declaration file (or a directory of them), expands every
//! declaration into entity specs and reports per-declaration outcomes.
//! The watcher only signals that a reload is due; rebuilding entities is
//! the caller's job.

mod core;
mod error;
mod watcher;

#[cfg(test)]
mod tests;

pub use self::core::{DeclarationLoader, LoadReport};
pub use self::error::{LoadResult, LoadStatus, LoaderError, Result};
