//! In-memory host state store read by template functions.
//!
//! Templates query host entities through `states()`, `state_attr()` and
//! `is_state()`. The worker fills the store from a states file and reloads
//! it before every refresh pass; tests fill it directly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State and attributes of one host entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl HostState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Errors reading a states file.
#[derive(Debug, thiserror::Error)]
pub enum StateFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("states file parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("state of '{0}' must be a scalar or a mapping with a 'state' key")]
    Invalid(String),
}

/// Entry in a states file: either the bare state or the full record.
#[derive(Deserialize)]
#[serde(untagged)]
enum StateEntry {
    Full(HostState),
    Bare(Value),
}

/// Thread-safe map of `entity_id` to [`HostState`].
#[derive(Debug, Default)]
pub struct StateStore {
    states: RwLock<HashMap<String, HostState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one entity's state, keeping no attributes.
    pub fn set(&self, entity_id: impl Into<String>, state: impl Into<String>) {
        self.insert(entity_id, HostState::new(state));
    }

    pub fn insert(&self, entity_id: impl Into<String>, state: HostState) {
        self.write().insert(entity_id.into(), state);
    }

    pub fn get(&self, entity_id: &str) -> Option<HostState> {
        self.read().get(entity_id).cloned()
    }

    pub fn remove(&self, entity_id: &str) -> Option<HostState> {
        self.write().remove(entity_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Replace the whole store with the contents of a YAML or JSON file.
    ///
    /// The file is a mapping of entity ids to either a scalar state or a
    /// `{state, attributes}` record. On error the store is left untouched.
    pub fn load_file(&self, path: &Path) -> Result<usize, StateFileError> {
        let contents = std::fs::read_to_string(path)?;
        let states = parse_states(&contents)?;
        let count = states.len();
        *self.write() = states;
        tracing::debug!(path = %path.display(), count, "loaded host states");
        Ok(count)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HostState>> {
        self.states.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HostState>> {
        self.states.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_states(contents: &str) -> Result<HashMap<String, HostState>, StateFileError> {
    if contents.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let raw: Option<HashMap<String, StateEntry>> = serde_yaml::from_str(contents)?;
    let mut states = HashMap::new();
    for (entity_id, entry) in raw.unwrap_or_default() {
        let state = match entry {
            StateEntry::Full(state) => state,
            StateEntry::Bare(Value::String(s)) => HostState::new(s),
            StateEntry::Bare(Value::Bool(b)) => HostState::new(if b { "on" } else { "off" }),
            StateEntry::Bare(Value::Number(n)) => HostState::new(n.to_string()),
            StateEntry::Bare(_) => return Err(StateFileError::Invalid(entity_id)),
        };
        states.insert(entity_id, state);
    }
    Ok(states)
}
