//! Two-pass parsing of declaration files.
//!
//! First pass: read the file as a list of raw YAML values and pull out each
//! entry's slug. Second pass: deserialize each body on its own, so one
//! malformed entry fails alone instead of taking the whole file down.

use serde_yaml::Value;
use template_update_core::UpdateError;

use super::{BatchDeclaration, ForEachBody, UpdateFields};

/// Key that switches a body from a single entity to a for-each batch.
pub const FOR_EACH_KEY: &str = "for_each";

/// Outcome of parsing one list entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    /// Position of the entry in the file.
    pub index: usize,
    /// Slug, when the entry had a readable one.
    pub slug: Option<String>,
    pub declaration: Result<BatchDeclaration, UpdateError>,
}

/// Parse a declaration document.
///
/// Only a document that is not a YAML list at all is an error here; every
/// per-entry problem is reported inside the returned [`ParsedEntry`] list.
/// An empty document yields no entries.
pub fn parse_document(contents: &str) -> Result<Vec<ParsedEntry>, serde_yaml::Error> {
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    let raw: Option<Vec<Value>> = serde_yaml::from_str(contents)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(index, value)| parse_entry(index, value))
        .collect())
}

fn parse_entry(index: usize, value: Value) -> ParsedEntry {
    let Value::Mapping(mapping) = value else {
        return ParsedEntry {
            index,
            slug: None,
            declaration: Err(config_error(format!(
                "entry {index}: expected a single `<slug>: {{...}}` mapping"
            ))),
        };
    };

    let len = mapping.len();
    let mut entries = mapping.into_iter();
    let (key, body) = match (entries.next(), entries.next()) {
        (Some(pair), None) => pair,
        _ => {
            return ParsedEntry {
                index,
                slug: None,
                declaration: Err(config_error(format!(
                    "entry {index}: expected exactly one slug key, found {len}"
                ))),
            };
        }
    };

    let Value::String(slug) = key else {
        return ParsedEntry {
            index,
            slug: None,
            declaration: Err(config_error(format!(
                "entry {index}: slug must be a string"
            ))),
        };
    };

    let declaration = validate_slug(&slug).and_then(|()| parse_body(&slug, body));
    ParsedEntry {
        index,
        slug: Some(slug),
        declaration,
    }
}

fn parse_body(slug: &str, body: Value) -> Result<BatchDeclaration, UpdateError> {
    let is_for_each = matches!(&body, Value::Mapping(m) if m.contains_key(FOR_EACH_KEY));

    if is_for_each {
        let parsed: ForEachBody = serde_yaml::from_value(body)
            .map_err(|e| config_error(format!("declaration '{slug}': {e}")))?;
        Ok(BatchDeclaration::ForEach {
            slug: slug.to_string(),
            elements: parsed.for_each,
            update: parsed.update,
        })
    } else {
        let fields: UpdateFields = serde_yaml::from_value(body)
            .map_err(|e| config_error(format!("declaration '{slug}': {e}")))?;
        Ok(BatchDeclaration::Single {
            slug: slug.to_string(),
            fields,
        })
    }
}

/// Slugs become object ids, so they are restricted to `[a-z0-9_]`.
fn validate_slug(slug: &str) -> Result<(), UpdateError> {
    if slug.is_empty() {
        return Err(config_error("slug must not be empty".to_string()));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(config_error(format!(
            "slug '{slug}' may only contain lowercase letters, digits and underscores"
        )));
    }
    Ok(())
}

fn config_error(msg: String) -> UpdateError {
    UpdateError::Configuration(msg)
}
