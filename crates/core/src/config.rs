use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).map(|v| v.to_lowercase()) {
        Some(v) if v == "true" || v == "1" || v == "yes" => true,
        Some(v) if v == "false" || v == "0" || v == "no" => false,
        _ => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub declarations: DeclarationsConfig,
    pub refresh: RefreshConfig,
    pub host: HostConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TEMPLATE_UPDATE_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TEMPLATE_UPDATE_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            declarations: DeclarationsConfig::from_env_profiled(p),
            refresh: RefreshConfig::from_env_profiled(p),
            host: HostConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  declarations: path={}, watch={}",
            self.declarations.path.display(),
            self.declarations.watch
        );
        tracing::info!(
            "  refresh:      interval={}s, eval_timeout={}ms, states={}",
            self.refresh.interval_secs,
            self.refresh.eval_timeout_ms,
            self.refresh
                .states_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string())
        );
        tracing::info!(
            "  host:         url={}, token={}",
            self.host.base_url.as_deref().unwrap_or("(dry-run)"),
            if self.host.token.is_some() { "set" } else { "(none)" }
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "declarations": {
                "path": self.declarations.path,
                "watch": self.declarations.watch,
            },
            "refresh": {
                "interval_secs": self.refresh.interval_secs,
                "eval_timeout_ms": self.refresh.eval_timeout_ms,
                "states_path": self.refresh.states_path,
            },
            "host": {
                "base_url": self.host.base_url,
                "action_timeout_secs": self.host.action_timeout_secs,
                "configured": self.host.is_configured(),
            },
        })
    }
}

// ── Declarations ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclarationsConfig {
    /// YAML file or directory of YAML files.
    pub path: PathBuf,
    /// Hot-reload declarations when files change.
    pub watch: bool,
}

impl DeclarationsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            path: PathBuf::from(profiled_env_or(
                p,
                "DECLARATIONS_PATH",
                "config/template_update.yaml",
            )),
            watch: profiled_env_bool(p, "DECLARATIONS_WATCH", true),
        }
    }
}

// ── Refresh ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    /// Upper bound for a single template evaluation.
    pub eval_timeout_ms: u64,
    /// Optional JSON/YAML file of host entity states exposed to templates.
    pub states_path: Option<PathBuf>,
}

impl RefreshConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            interval_secs: profiled_env_u64(p, "REFRESH_INTERVAL_SECS", 30),
            eval_timeout_ms: profiled_env_u64(p, "EVAL_TIMEOUT_MS", 2000),
            states_path: profiled_env_opt(p, "STATES_PATH").map(PathBuf::from),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.eval_timeout_ms)
    }
}

// ── Host (action execution) ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Base URL of the host REST API. `None` selects the dry-run executor.
    pub base_url: Option<String>,
    /// Bearer token; may contain `${VAR}` references.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub action_timeout_secs: u64,
}

impl HostConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            base_url: profiled_env_opt(p, "HOST_URL"),
            token: profiled_env_opt(p, "HOST_TOKEN"),
            action_timeout_secs: profiled_env_u64(p, "ACTION_TIMEOUT_SECS", 30),
        }
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own profile prefix so parallel tests never share keys.

    #[test]
    fn defaults_apply_without_env() {
        let config = Config::for_profile("CFGTEST_DEFAULTS_UNSET");
        assert_eq!(config.profile_label(), "CFGTEST_DEFAULTS_UNSET");
        assert_eq!(config.refresh.interval_secs, 30);
        assert_eq!(config.refresh.eval_timeout(), Duration::from_millis(2000));
        assert_eq!(config.host.action_timeout_secs, 30);
    }

    #[test]
    fn profiled_keys_take_precedence() {
        env::set_var("CFGTEST_A_REFRESH_INTERVAL_SECS", "5");
        env::set_var("CFGTEST_A_DECLARATIONS_WATCH", "false");
        env::set_var("CFGTEST_A_HOST_URL", "http://hub.local:8123");

        let config = Config::for_profile("cfgtest_a");
        assert_eq!(config.profile, "CFGTEST_A");
        assert_eq!(config.refresh.interval(), Duration::from_secs(5));
        assert!(!config.declarations.watch);
        assert!(config.host.is_configured());

        env::remove_var("CFGTEST_A_REFRESH_INTERVAL_SECS");
        env::remove_var("CFGTEST_A_DECLARATIONS_WATCH");
        env::remove_var("CFGTEST_A_HOST_URL");
    }

    #[test]
    fn redacted_summary_omits_token() {
        env::set_var("CFGTEST_B_HOST_TOKEN", "super-secret");
        let config = Config::for_profile("CFGTEST_B");
        assert_eq!(config.host.token.as_deref(), Some("super-secret"));

        let summary = config.redacted_summary().to_string();
        assert!(!summary.contains("super-secret"));
        env::remove_var("CFGTEST_B_HOST_TOKEN");
    }

    #[test]
    fn zero_interval_is_clamped() {
        env::set_var("CFGTEST_C_REFRESH_INTERVAL_SECS", "0");
        let config = Config::for_profile("CFGTEST_C");
        assert_eq!(config.refresh.interval(), Duration::from_secs(1));
        env::remove_var("CFGTEST_C_REFRESH_INTERVAL_SECS");
    }
}
