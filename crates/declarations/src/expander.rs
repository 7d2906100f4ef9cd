//! Expansion of batch declarations into per-entity specs.
//!
//! Expansion is structural only: it decides how many entities exist and
//! which item mapping each one closes over. No template is parsed or
//! evaluated here; syntax errors surface at the first refresh.

use std::collections::HashSet;
use std::sync::Arc;

use template_update_core::{
    map_from_json, ContextMap, ContextValue, Result, TemplateRef, UpdateError, ITEM_VARIABLE,
};
use tracing::{debug, warn};

use crate::schema::{ActionDecl, BatchDeclaration, UpdateFields};
use crate::spec::{ActionTemplate, EntitySpec, PayloadTemplate};

/// Prefix of names generated for for-each entities without a `name`.
pub const DEFAULT_NAME_PREFIX: &str = "template_update";

/// Result of expanding a batch of declarations.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    /// Specs of every declaration that expanded, in declaration order.
    pub specs: Vec<EntitySpec>,
    /// One entry per declaration that failed.
    pub errors: Vec<ExpansionError>,
}

/// A declaration that could not be expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionError {
    /// Position of the declaration in the input slice.
    pub index: usize,
    pub slug: String,
    pub error: UpdateError,
}

/// Expand declarations in order.
///
/// A failing declaration is recorded in [`Expansion::errors`] and never
/// prevents its siblings from expanding. A slug or object id that was
/// already produced earlier in the batch is rejected; the first
/// declaration keeps it.
pub fn expand(declarations: &[BatchDeclaration]) -> Expansion {
    let mut expansion = Expansion::default();
    let mut seen = HashSet::new();
    let mut object_ids = HashSet::new();

    for (index, decl) in declarations.iter().enumerate() {
        let slug = decl.slug();

        let result = if seen.contains(slug) {
            Err(UpdateError::Configuration(format!(
                "duplicate declaration slug '{slug}'"
            )))
        } else {
            expand_declaration(decl).and_then(|specs| {
                match specs.iter().find(|s| object_ids.contains(&s.object_id)) {
                    Some(clash) => Err(UpdateError::Configuration(format!(
                        "declaration '{slug}': duplicate object id '{}'",
                        clash.object_id
                    ))),
                    None => Ok(specs),
                }
            })
        };

        match result {
            Ok(specs) => {
                debug!(slug, kind = decl.kind(), entities = specs.len(), "expanded declaration");
                seen.insert(slug.to_string());
                object_ids.extend(specs.iter().map(|s| s.object_id.clone()));
                expansion.specs.extend(specs);
            }
            Err(error) => {
                warn!(slug, kind = decl.kind(), error = %error, "failed to expand declaration");
                expansion.errors.push(ExpansionError {
                    index,
                    slug: slug.to_string(),
                    error,
                });
            }
        }
    }

    expansion
}

/// Expand a single declaration into its entity specs.
pub fn expand_declaration(decl: &BatchDeclaration) -> Result<Vec<EntitySpec>> {
    match decl {
        BatchDeclaration::Single { slug, fields } => {
            let name = fields.name.clone().unwrap_or_else(|| slug.clone());
            let spec = build_spec(slug.clone(), slug, None, fields, name, None)?;
            Ok(vec![spec])
        }
        BatchDeclaration::ForEach {
            slug,
            elements,
            update,
        } => {
            if elements.is_empty() {
                return Err(UpdateError::Configuration(format!(
                    "declaration '{slug}': for_each must list at least one element"
                )));
            }
            required_versions(slug, update)?;

            elements
                .iter()
                .enumerate()
                .map(|(index, element)| {
                    let item = Arc::new(element_context(slug, index, element)?);
                    let name = update
                        .name
                        .clone()
                        .unwrap_or_else(|| default_item_name(slug, index, &item));
                    build_spec(
                        format!("{slug}_{index}"),
                        slug,
                        Some(index),
                        update,
                        name,
                        Some(item),
                    )
                })
                .collect()
        }
    }
}

/// Validate one for-each element into a context map.
fn element_context(slug: &str, index: usize, element: &serde_json::Value) -> Result<ContextMap> {
    let path = format!("declaration '{slug}' {ITEM_VARIABLE}[{index}]");
    match element {
        serde_json::Value::Object(obj) => map_from_json(&path, obj),
        _ => Err(UpdateError::Configuration(format!(
            "{path}: each for_each element must be a mapping"
        ))),
    }
}

/// `template_update_<device_id>` when the item has a scalar `device_id`,
/// otherwise `<slug>_<index>`.
fn default_item_name(slug: &str, index: usize, item: &ContextMap) -> String {
    match item.get("device_id").and_then(ContextValue::to_scalar_string) {
        Some(device_id) => format!("{DEFAULT_NAME_PREFIX}_{device_id}"),
        None => format!("{slug}_{index}"),
    }
}

/// Both version templates, or a configuration error naming the missing one.
fn required_versions<'a>(slug: &str, fields: &'a UpdateFields) -> Result<(&'a str, &'a str)> {
    let missing = |key: &str| {
        UpdateError::Configuration(format!(
            "declaration '{slug}': missing required field '{key}'"
        ))
    };
    let installed = fields
        .installed_version
        .as_deref()
        .ok_or_else(|| missing("installed_version"))?;
    let latest = fields
        .latest_version
        .as_deref()
        .ok_or_else(|| missing("latest_version"))?;
    Ok((installed, latest))
}

fn build_spec(
    object_id: String,
    slug: &str,
    index: Option<usize>,
    fields: &UpdateFields,
    name: String,
    item: Option<Arc<ContextMap>>,
) -> Result<EntitySpec> {
    let (installed, latest) = required_versions(slug, fields)?;

    let wrap = |source: &str| match &item {
        Some(item) => TemplateRef::bound(source, Arc::clone(item)),
        None => TemplateRef::new(source),
    };

    let install_action = fields
        .install_action
        .as_ref()
        .map(|action| build_action(slug, action, &wrap))
        .transpose()?;

    Ok(EntitySpec {
        object_id,
        slug: slug.to_string(),
        index,
        name: wrap(name.as_str()),
        installed_version: wrap(installed),
        latest_version: wrap(latest),
        release_notes: fields.release_notes.as_deref().map(wrap),
        title: fields.title.as_deref().map(wrap),
        entity_picture: fields.entity_picture.as_deref().map(wrap),
        availability: fields.availability.as_deref().map(wrap),
        device_class: fields.device_class.clone(),
        auto_update: fields.auto_update,
        install_action,
    })
}

fn build_action(
    slug: &str,
    decl: &ActionDecl,
    wrap: &dyn Fn(&str) -> TemplateRef,
) -> Result<ActionTemplate> {
    let action = wrap(decl.action.as_str());
    if action.as_literal().is_some_and(|s| s.trim().is_empty()) {
        return Err(UpdateError::Configuration(format!(
            "declaration '{slug}': install_action.action must not be empty"
        )));
    }

    let target = match &decl.target {
        None => None,
        Some(value) if value.is_object() => Some(PayloadTemplate::from_json(value, wrap)),
        Some(_) => {
            return Err(UpdateError::Configuration(format!(
                "declaration '{slug}': install_action.target must be a mapping"
            )))
        }
    };

    let data = match &decl.data {
        None | Some(serde_json::Value::Null) => PayloadTemplate::empty_map(),
        Some(value) if value.is_object() => PayloadTemplate::from_json(value, wrap),
        Some(_) => {
            return Err(UpdateError::Configuration(format!(
                "declaration '{slug}': install_action.data must be a mapping"
            )))
        }
    };

    Ok(ActionTemplate {
        action,
        target,
        data,
    })
}
