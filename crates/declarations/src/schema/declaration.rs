//! Typed batch declarations produced by the first parsing stage.

use super::UpdateFields;

/// One declaration from the file, before expansion.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchDeclaration {
    /// A single entity with (possibly templated) fields.
    Single { slug: String, fields: UpdateFields },
    /// One `update` field shape applied once per element.
    ForEach {
        slug: String,
        /// Raw element mappings; validated into context maps by the expander.
        elements: Vec<serde_json::Value>,
        update: UpdateFields,
    },
}

impl BatchDeclaration {
    /// The slug keying this declaration in the file.
    pub fn slug(&self) -> &str {
        match self {
            BatchDeclaration::Single { slug, .. } => slug,
            BatchDeclaration::ForEach { slug, .. } => slug,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchDeclaration::Single { .. } => "single",
            BatchDeclaration::ForEach { .. } => "for_each",
        }
    }

    /// The field shape every resulting entity is built from.
    pub fn fields(&self) -> &UpdateFields {
        match self {
            BatchDeclaration::Single { fields, .. } => fields,
            BatchDeclaration::ForEach { update, .. } => update,
        }
    }
}
