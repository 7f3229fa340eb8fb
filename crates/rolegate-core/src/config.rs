//! JSON configuration for rolegate.
//!
//! ```json
//! {
//!   "network": { "internet_access": false, "internet_allowed_roles": ["controller"] },
//!   "secrets": { "github": { "env_var": "GITHUB_TOKEN" } },
//!   "secret_mode": true
//! }
//! ```
//!
//! Every field is optional. Missing blocks fall back to the fail-closed
//! defaults (no internet, no secrets, secret mode off).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RolegateError};

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".continue/user_config.json";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`] in the CLI.
pub const CONFIG_ENV_VAR: &str = "ROLEGATE_CONFIG";

/// Network policy block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Global switch: when `true` every role may reach the internet.
    pub internet_access: bool,
    /// Roles allowed internet access while the global switch is off.
    pub internet_allowed_roles: Vec<String>,
}

/// Reference to a secret held in the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretRef {
    pub env_var: Option<String>,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolegateConfig {
    pub network: NetworkConfig,
    /// Logical secret name -> environment variable reference.
    pub secrets: BTreeMap<String, SecretRef>,
    /// Mask known secret values in everything rolegate persists or sends.
    pub secret_mode: bool,
}

impl RolegateConfig {
    /// Load and parse `path`, surfacing I/O and parse errors.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let text = text.trim_start_matches('\u{feff}');
        let value: serde_json::Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(RolegateError::InvalidConfig(format!(
                "{} must contain a JSON object",
                path.display()
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Load `path`, degrading to the default (fail-closed) config on any error.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "config not found, using defaults");
            return Self::default();
        }
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                Self::default()
            }
        }
    }

    /// Environment variable names referenced by the `secrets` block.
    pub fn secret_env_vars(&self) -> impl Iterator<Item = &str> {
        self.secrets.values().filter_map(|s| s.env_var.as_deref())
    }
}

/// Resolve the config path: explicit path, else [`DEFAULT_CONFIG_PATH`].
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("user_config.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_full_config_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{
                "network": {"internet_access": false, "internet_allowed_roles": ["controller"]},
                "secrets": {"gh": {"env_var": "GH_TOKEN"}, "note": {}},
                "secret_mode": true
            }"#,
        );
        let cfg = RolegateConfig::load(&path).unwrap();
        assert!(!cfg.network.internet_access);
        assert_eq!(cfg.network.internet_allowed_roles, vec!["controller"]);
        assert!(cfg.secret_mode);
        let vars: Vec<&str> = cfg.secret_env_vars().collect();
        assert_eq!(vars, vec!["GH_TOKEN"]);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, r#"{"secret_mode": true}"#);
        let cfg = RolegateConfig::load(&path).unwrap();
        assert_eq!(cfg.network, NetworkConfig::default());
        assert!(cfg.secrets.is_empty());
    }

    #[test]
    fn test_load_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[1, 2]");
        let err = RolegateConfig::load(&path).unwrap_err();
        assert!(matches!(err, RolegateError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_or_default_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "{ nope");
        assert_eq!(RolegateConfig::load_or_default(&path), RolegateConfig::default());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RolegateConfig::load_or_default(&dir.path().join("missing.json"));
        assert!(!cfg.network.internet_access);
    }

    #[test]
    fn test_resolve_config_path_prefers_explicit() {
        let explicit = PathBuf::from("/etc/rolegate.json");
        assert_eq!(resolve_config_path(Some(&explicit)), explicit);
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
    }
}
