//! Runtime configuration - TOML file plus environment overrides
//!
//! ```toml
//! [gc]
//! enabled = true
//! threshold = 700
//!
//! [allocator]
//! limit_bytes = 67108864
//!
//! [freelist]
//! enabled = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub gc: GcConfig,

    #[serde(default)]
    pub allocator: AllocatorConfig,

    #[serde(default)]
    pub freelist: FreelistConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tracked allocations between automatic collections
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Upper bound on live record bytes; unlimited when absent
    #[serde(default)]
    pub limit_bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreelistConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_threshold(),
        }
    }
}

impl Default for FreelistConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

impl RuntimeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Defaults overlaid with environment variables, ignoring malformed ones
    pub fn from_env() -> Self {
        let config = Self::default();
        match config.clone().with_env_overrides() {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed environment configuration");
                config
            }
        }
    }

    /// Apply `PYBRIDGE_*` environment overrides
    ///
    /// - `PYBRIDGE_GC_THRESHOLD`: tracked allocations between collections
    /// - `PYBRIDGE_GC_DISABLE`: any value disables automatic collection
    /// - `PYBRIDGE_ALLOC_LIMIT`: live record byte budget
    /// - `PYBRIDGE_FREELIST_DISABLE`: any value bypasses freelists
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(value) = std::env::var("PYBRIDGE_GC_THRESHOLD") {
            self.gc.threshold = parse_env("PYBRIDGE_GC_THRESHOLD", value)?;
        }

        if std::env::var("PYBRIDGE_GC_DISABLE").is_ok() {
            self.gc.enabled = false;
        }

        if let Ok(value) = std::env::var("PYBRIDGE_ALLOC_LIMIT") {
            self.allocator.limit_bytes = Some(parse_env("PYBRIDGE_ALLOC_LIMIT", value)?);
        }

        if std::env::var("PYBRIDGE_FREELIST_DISABLE").is_ok() {
            self.freelist.enabled = false;
        }

        Ok(self)
    }
}

fn parse_env(var: &'static str, value: String) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> usize {
    700
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(config.gc.enabled);
        assert_eq!(config.gc.threshold, 700);
        assert_eq!(config.allocator.limit_bytes, None);
        assert!(config.freelist.enabled);
    }

    #[test]
    fn sections_override_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [gc]
            threshold = 50

            [allocator]
            limit_bytes = 4096

            [freelist]
            enabled = false
            "#,
        )
        .unwrap();

        assert!(config.gc.enabled);
        assert_eq!(config.gc.threshold, 50);
        assert_eq!(config.allocator.limit_bytes, Some(4096));
        assert!(!config.freelist.enabled);
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        let err = RuntimeConfig::from_toml_str("[gc]\nthreshold = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gc]\nenabled = false").unwrap();

        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert!(!config.gc.enabled);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RuntimeConfig::from_file("/nonexistent/pybridge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn env_value_parse_failure_names_the_variable() {
        let err = parse_env("PYBRIDGE_GC_THRESHOLD", "lots".to_string()).unwrap_err();
        assert!(err.to_string().contains("PYBRIDGE_GC_THRESHOLD"));
    }
}
