//! YAML declaration schema with serde deserialization.
//!
//! - `UpdateFields`: the raw per-entity field shape
//! - `BatchDeclaration`: `Single` or `ForEach`, one per list entry
//! - `parse_document`: two-pass loader that isolates malformed entries

mod declaration;
mod envelope;
mod fields;

pub use declaration::*;
pub use envelope::*;
pub use fields::*;
