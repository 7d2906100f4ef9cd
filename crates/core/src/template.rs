//! Stored, unevaluated template expressions.
//!
//! A [`TemplateRef`] never evaluates itself. It carries the expression source,
//! whether the source is a plain literal, and (for entities expanded from a
//! `for_each` block) the item mapping captured at expansion time. Evaluators
//! combine that binding with the runtime context via [`TemplateRef::context`].

use std::sync::Arc;

use crate::value::{ContextMap, ContextValue};

/// Name under which a for-each element is exposed to templates.
pub const ITEM_VARIABLE: &str = "item";

/// An immutable expression plus its captured item binding.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRef {
    source: String,
    literal: bool,
    item: Option<Arc<ContextMap>>,
}

impl TemplateRef {
    /// Wrap an expression with no item binding.
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let literal = !is_templated(&source);
        Self {
            source,
            literal,
            item: None,
        }
    }

    /// Wrap an expression that closes over one for-each element.
    pub fn bound(source: impl Into<String>, item: Arc<ContextMap>) -> Self {
        Self {
            item: Some(item),
            ..Self::new(source)
        }
    }

    /// The raw expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the source has no template syntax and evaluates to itself.
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    /// The literal value, if this reference needs no evaluation.
    pub fn as_literal(&self) -> Option<&str> {
        self.literal.then_some(self.source.as_str())
    }

    /// The captured for-each element, if any.
    pub fn item(&self) -> Option<&ContextMap> {
        self.item.as_deref()
    }

    /// Build the evaluation context: `base` plus the captured `item` binding.
    ///
    /// The captured item always wins over an `item` key in `base`.
    pub fn context(&self, base: &ContextMap) -> ContextMap {
        let mut ctx = base.clone();
        if let Some(item) = &self.item {
            ctx.insert(
                ITEM_VARIABLE.to_string(),
                ContextValue::Map(item.as_ref().clone()),
            );
        }
        ctx
    }
}

/// Whether a string contains Jinja expression, statement or comment markers.
pub fn is_templated(source: &str) -> bool {
    source.contains("{{") || source.contains("{%") || source.contains("{#")
}
