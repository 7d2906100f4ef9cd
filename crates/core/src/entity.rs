use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one update entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Unavailable,
    UpToDate,
    UpdateAvailable,
    Installing,
    InstallFailed,
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateState::Unavailable => write!(f, "unavailable"),
            UpdateState::UpToDate => write!(f, "up_to_date"),
            UpdateState::UpdateAvailable => write!(f, "update_available"),
            UpdateState::Installing => write!(f, "installing"),
            UpdateState::InstallFailed => write!(f, "install_failed"),
        }
    }
}

/// Capabilities advertised to the host, derived from the entity configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedFeatures {
    pub install: bool,
    pub specific_version: bool,
    pub release_notes: bool,
}

/// Point-in-time view of an update entity, safe to serialize for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub object_id: String,
    pub name: String,
    pub state: UpdateState,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub release_notes: Option<String>,
    pub title: Option<String>,
    pub entity_picture: Option<String>,
    pub device_class: Option<String>,
    pub auto_update: bool,
    pub in_progress: bool,
    pub skipped_version: Option<String>,
    pub is_skipped: bool,
    pub supported_features: SupportedFeatures,
    /// Rendered `Display` of the last recorded error.
    pub last_error: Option<String>,
    /// Stable label of the last recorded error (see `UpdateError::kind`).
    pub last_error_kind: Option<String>,
    pub last_refreshed: Option<DateTime<Utc>>,
}
