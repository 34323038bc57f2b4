//! Engine configuration: defaults, user-level TOML, project-level TOML
//! override, then environment. Later sources win per field.

use crate::apply::FailurePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Gitignore-style patterns excluded from every scan. Part of the
    /// snapshot cache identity.
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    /// Fail-closed posture: unrecognized commands are blocked instead of
    /// prompted.
    #[serde(default = "bool_true")]
    pub safe_mode: bool,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Override for the snapshot cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Override for the audit log directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ignore: default_ignore(),
            safe_mode: true,
            failure_policy: FailurePolicy::default(),
            cache_dir: None,
            log_dir: None,
        }
    }
}

fn bool_true() -> bool {
    true
}

fn default_ignore() -> Vec<String> {
    vec![
        ".git".into(),
        "node_modules".into(),
        "target".into(),
        "__pycache__".into(),
        ".venv".into(),
        "vendor".into(),
    ]
}

/// Partial config as found in a TOML file: only present keys override.
#[derive(Debug, Default, Deserialize)]
struct ConfigOverlay {
    ignore: Option<Vec<String>>,
    safe_mode: Option<bool>,
    failure_policy: Option<FailurePolicy>,
    cache_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Load config in order of precedence: defaults, then the user config
    /// file, then `<root>/.repostate.toml`, then `REPOSTATE_SAFE_MODE`.
    /// Missing files fall back silently; unparseable files are real errors.
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let mut paths = Vec::new();
        if let Some(user) = Self::user_config_path() {
            paths.push(user);
        }
        paths.push(root.join(".repostate.toml"));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let overlay: ConfigOverlay = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            config.merge(overlay);
        }

        if let Ok(value) = std::env::var("REPOSTATE_SAFE_MODE") {
            config.safe_mode = coerce_bool(&value, config.safe_mode);
        }

        Ok(config)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("repostate").join("config.toml"))
    }

    fn merge(&mut self, overlay: ConfigOverlay) {
        if let Some(ignore) = overlay.ignore {
            self.ignore = ignore;
        }
        if let Some(safe_mode) = overlay.safe_mode {
            self.safe_mode = safe_mode;
        }
        if let Some(policy) = overlay.failure_policy {
            self.failure_policy = policy;
        }
        if let Some(cache_dir) = overlay.cache_dir {
            self.cache_dir = Some(cache_dir);
        }
        if let Some(log_dir) = overlay.log_dir {
            self.log_dir = Some(log_dir);
        }
    }
}

fn coerce_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => true,
        "0" | "false" | "f" | "no" | "n" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_fail_closed() {
        let config = EngineConfig::default();
        assert!(config.safe_mode);
        assert_eq!(config.failure_policy, FailurePolicy::StopOnFirstFailure);
        assert!(config.ignore.contains(&".git".to_string()));
    }

    #[test]
    fn project_file_overrides_present_keys_only() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(".repostate.toml"),
            "safe_mode = false\nignore = [\"dist\"]\n",
        )
        .unwrap();

        let config = EngineConfig::load(tmp.path()).unwrap();
        assert!(!config.safe_mode);
        assert_eq!(config.ignore, vec!["dist".to_string()]);
        // Untouched keys keep their defaults
        assert_eq!(config.failure_policy, FailurePolicy::StopOnFirstFailure);
    }

    #[test]
    fn failure_policy_parses_snake_case() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(".repostate.toml"),
            "failure_policy = \"continue_on_error\"\n",
        )
        .unwrap();
        let config = EngineConfig::load(tmp.path()).unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::ContinueOnError);
    }

    #[test]
    fn unparseable_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".repostate.toml"), "safe_mode = [broken").unwrap();
        assert!(EngineConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn coerce_bool_accepts_common_spellings() {
        assert!(coerce_bool("Yes", false));
        assert!(coerce_bool("on", false));
        assert!(!coerce_bool("0", true));
        assert!(coerce_bool("garbage", true));
        assert!(!coerce_bool("garbage", false));
    }

    #[test]
    fn toml_roundtrip() {
        let config = EngineConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }
}
