//! Field shape shared by single declarations and for-each `update` blocks.

use serde::{Deserialize, Deserializer, Serialize};

/// Raw update-entity fields exactly as written in the declaration file.
///
/// Every template-valued field is optional here so that a missing required
/// field is reported by the expander as a configuration error naming the
/// declaration, rather than as an opaque YAML error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateFields {
    #[serde(default, deserialize_with = "opt_scalar")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub installed_version: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub latest_version: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub release_notes: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub entity_picture: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub device_class: Option<String>,
    #[serde(default, deserialize_with = "opt_scalar")]
    pub availability: Option<String>,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub install_action: Option<ActionDecl>,
}

/// Raw `install_action` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDecl {
    /// `domain.service` identifier, may be templated.
    #[serde(deserialize_with = "scalar")]
    pub action: String,
    /// Host target mapping (e.g. `entity_id`), string leaves may be templated.
    #[serde(default)]
    pub target: Option<serde_json::Value>,
    /// Action data mapping, string leaves may be templated.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Body of a for-each declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForEachBody {
    pub for_each: Vec<serde_json::Value>,
    pub update: UpdateFields,
}

/// Accept YAML strings, numbers and booleans for template-valued fields.
///
/// `installed_version: 1.2` is common in hand-written files; it is stored as
/// its textual form instead of being rejected.
fn scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    scalar_to_string(value).map_err(serde::de::Error::custom)
}

fn opt_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_yaml::Value>::deserialize(deserializer)? {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(value) => scalar_to_string(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> Result<String, String> {
    use serde_yaml::Value;

    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err("expected a string, got null".to_string()),
        Value::Sequence(_) => Err("expected a string, got a list".to_string()),
        Value::Mapping(_) => Err("expected a string, got a mapping".to_string()),
        Value::Tagged(tagged) => Err(format!("unsupported YAML tag {}", tagged.tag)),
    }
}
