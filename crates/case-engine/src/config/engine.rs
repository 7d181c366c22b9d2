//! Engine configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::EngineResult;

/// Engine configuration loaded from environment variables.
///
/// Environment variables are prefixed with `CASE_ENGINE_`:
/// - `CASE_ENGINE_LOG_FILTER`: tracing filter directive (default: "info,case_engine=debug")
/// - `CASE_ENGINE_MAX_CASCADE_DEPTH`: bound on completion cascades (default: 64)
/// - `CASE_ENGINE_DEFINITIONS_DIR`: directory of compiled case definitions to deploy
/// - `CASE_ENGINE_ENFORCE_BUSINESS_KEY_UNIQUENESS`: reject duplicate business keys (default: false)
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Tracing filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Maximum number of nested completion / callback hops per command
    #[serde(default = "default_max_cascade_depth")]
    pub max_cascade_depth: usize,

    /// Directory holding `*.yaml` case definitions (optional)
    #[serde(default)]
    pub definitions_dir: Option<PathBuf>,

    /// Reject a business key already used by a live instance of the same definition key
    #[serde(default)]
    pub enforce_business_key_uniqueness: bool,
}

fn default_log_filter() -> String {
    "info,case_engine=debug".to_string()
}

fn default_max_cascade_depth() -> usize {
    64
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("CASE_ENGINE_").from_env::<EngineConfig>()
    }

    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> EngineResult<Self> {
        dotenvy::dotenv().ok();
        Ok(Self::from_env()?)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            max_cascade_depth: default_max_cascade_depth(),
            definitions_dir: None,
            enforce_business_key_uniqueness: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_cascade_depth, 64);
        assert!(config.definitions_dir.is_none());
        assert!(!config.enforce_business_key_uniqueness);
    }

    #[test]
    fn test_from_iter_applies_defaults() {
        let vars = vec![
            ("CASE_ENGINE_MAX_CASCADE_DEPTH".to_string(), "8".to_string()),
            (
                "CASE_ENGINE_DEFINITIONS_DIR".to_string(),
                "/etc/cases".to_string(),
            ),
        ];
        let config: EngineConfig = envy::prefixed("CASE_ENGINE_").from_iter(vars).unwrap();
        assert_eq!(config.max_cascade_depth, 8);
        assert_eq!(config.definitions_dir, Some(PathBuf::from("/etc/cases")));
        assert_eq!(config.log_filter, "info,case_engine=debug");
    }
}
