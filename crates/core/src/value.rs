use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Result, UpdateError};

/// Insertion-ordered mapping exposed to templates (e.g. the `item` of a for-each element).
pub type ContextMap = IndexMap<String, ContextValue>;

/// Typed template context values.
///
/// Declaration items arrive as arbitrary YAML; they are checked against this
/// closed set once, at expansion time, so templates never see nulls or lists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Map(ContextMap),
}

impl ContextValue {
    /// Extract as string slice, returning None for non-string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render a scalar the way a template would print it.
    ///
    /// Maps have no scalar form and return None.
    pub fn to_scalar_string(&self) -> Option<String> {
        match self {
            ContextValue::String(s) => Some(s.clone()),
            ContextValue::Integer(i) => Some(i.to_string()),
            ContextValue::Float(f) => Some(f.to_string()),
            ContextValue::Bool(b) => Some(b.to_string()),
            ContextValue::Map(_) => None,
        }
    }

    /// Convert a JSON value, rejecting shapes templates cannot rely on.
    ///
    /// `path` names the value in error messages (e.g. `item.device_id`).
    pub fn from_json(path: &str, value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        match value {
            Value::String(s) => Ok(ContextValue::String(s.clone())),
            Value::Bool(b) => Ok(ContextValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ContextValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ContextValue::Float(f))
                } else {
                    Err(UpdateError::Configuration(format!(
                        "{path}: number {n} is out of range"
                    )))
                }
            }
            Value::Object(obj) => Ok(ContextValue::Map(map_from_json(path, obj)?)),
            Value::Null => Err(UpdateError::Configuration(format!(
                "{path}: null values are not allowed"
            ))),
            Value::Array(_) => Err(UpdateError::Configuration(format!(
                "{path}: lists are not allowed, use a mapping"
            ))),
        }
    }
}

/// Convert a JSON object into a [`ContextMap`], validating every nested value.
pub fn map_from_json(path: &str, obj: &serde_json::Map<String, serde_json::Value>) -> Result<ContextMap> {
    let mut out = ContextMap::with_capacity(obj.len());
    for (key, value) in obj {
        let child = format!("{path}.{key}");
        out.insert(key.clone(), ContextValue::from_json(&child, value)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_nested_mapping() {
        let value = json!({
            "device_id": "1",
            "port": 8080,
            "ratio": 0.5,
            "enabled": true,
            "meta": { "room": "kitchen" }
        });
        let ContextValue::Map(map) = ContextValue::from_json("item", &value).unwrap() else {
            panic!("expected a map");
        };
        assert_eq!(map["device_id"], ContextValue::String("1".into()));
        assert_eq!(map["port"], ContextValue::Integer(8080));
        assert_eq!(map["ratio"], ContextValue::Float(0.5));
        assert_eq!(map["enabled"], ContextValue::Bool(true));
        match &map["meta"] {
            ContextValue::Map(meta) => assert_eq!(meta["room"].as_str(), Some("kitchen")),
            other => panic!("expected nested map, got {other:?}"),
        }
    }

    #[test]
    fn rejects_null_with_path() {
        let err = ContextValue::from_json("item", &json!({ "a": { "b": null } })).unwrap_err();
        match err {
            UpdateError::Configuration(msg) => assert!(msg.contains("item.a.b"), "{msg}"),
            other => panic!("expected Configuration error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_lists() {
        let err = ContextValue::from_json("item", &json!({ "ids": [1, 2] })).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn scalar_rendering() {
        assert_eq!(ContextValue::Integer(3).to_scalar_string().as_deref(), Some("3"));
        assert_eq!(ContextValue::Bool(false).to_scalar_string().as_deref(), Some("false"));
        assert_eq!(ContextValue::Map(ContextMap::new()).to_scalar_string(), None);
    }
}
