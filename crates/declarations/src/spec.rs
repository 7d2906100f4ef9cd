//! Resolved, immutable per-entity configuration produced by the expander.

use indexmap::IndexMap;
use template_update_core::{ContextMap, SupportedFeatures, TemplateRef};

/// Configuration for exactly one update entity.
///
/// Every templated field already carries its for-each item binding (if
/// any), so a spec is self-contained: evaluating it needs only the
/// runtime context.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    /// Stable id that needs no evaluation: `<slug>` or `<slug>_<index>`.
    pub object_id: String,
    /// Slug of the declaration this spec came from.
    pub slug: String,
    /// Element index for for-each entities.
    pub index: Option<usize>,
    pub name: TemplateRef,
    pub installed_version: TemplateRef,
    pub latest_version: TemplateRef,
    pub release_notes: Option<TemplateRef>,
    pub title: Option<TemplateRef>,
    pub entity_picture: Option<TemplateRef>,
    pub availability: Option<TemplateRef>,
    pub device_class: Option<String>,
    pub auto_update: bool,
    pub install_action: Option<ActionTemplate>,
}

impl EntitySpec {
    /// Capabilities derived from which fields are configured.
    pub fn supported_features(&self) -> SupportedFeatures {
        let install = self.install_action.is_some();
        SupportedFeatures {
            install,
            specific_version: install,
            release_notes: self.release_notes.is_some(),
        }
    }

    /// The for-each element this entity closes over.
    pub fn item(&self) -> Option<&ContextMap> {
        self.installed_version.item()
    }
}

/// Templated remediation action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTemplate {
    /// Renders to `domain.service`.
    pub action: TemplateRef,
    pub target: Option<PayloadTemplate>,
    /// Always a `PayloadTemplate::Map` (empty when not configured).
    pub data: PayloadTemplate,
}

/// Tree of templates forwarded verbatim to the action executor.
///
/// String leaves are templates; numbers, booleans and nulls pass through.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadTemplate {
    Template(TemplateRef),
    Literal(serde_json::Value),
    List(Vec<PayloadTemplate>),
    Map(IndexMap<String, PayloadTemplate>),
}

impl PayloadTemplate {
    /// Build a payload tree from raw JSON, wrapping strings with `wrap`.
    pub fn from_json(value: &serde_json::Value, wrap: &dyn Fn(&str) -> TemplateRef) -> Self {
        use serde_json::Value;

        match value {
            Value::String(s) => PayloadTemplate::Template(wrap(s)),
            Value::Array(items) => {
                PayloadTemplate::List(items.iter().map(|v| Self::from_json(v, wrap)).collect())
            }
            Value::Object(obj) => PayloadTemplate::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v, wrap)))
                    .collect(),
            ),
            other => PayloadTemplate::Literal(other.clone()),
        }
    }

    /// An empty mapping.
    pub fn empty_map() -> Self {
        PayloadTemplate::Map(IndexMap::new())
    }

    pub fn is_map(&self) -> bool {
        matches!(self, PayloadTemplate::Map(_))
    }
}
