//! Update-entity declarations: YAML schema, for-each expansion and loading.
//!
//! This crate provides:
//! - YAML declaration schema with two-pass, per-entry deserialization
//! - `EntitySpec` / `ActionTemplate`: resolved per-entity configuration
//! - The for-each expander that binds each element into its entity's templates
//! - Filesystem loader with hot-reload via `notify` watcher

pub mod expander;
pub mod loader;
pub mod schema;
pub mod spec;

pub use expander::{expand, expand_declaration, Expansion, ExpansionError};
pub use loader::{DeclarationLoader, LoadReport, LoadResult, LoadStatus, LoaderError};
pub use schema::{parse_document, BatchDeclaration, ParsedEntry, UpdateFields};
pub use spec::{ActionTemplate, EntitySpec, PayloadTemplate};
