//! Configuration management for slidegate.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GateError, Result};
use crate::ratelimit::{Limit, LimitSpec};

/// Prefix of environment variables read by [`GateConfig::load`].
pub const ENV_PREFIX: &str = "SLIDEGATE";

/// Main configuration for an admission engine and the binary around it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Limit applied to keys without an override
    #[serde(default)]
    pub default_limit: LimitSpec,

    /// Per-key overrides installed at startup
    #[serde(default)]
    pub limits: Vec<KeyLimit>,

    /// Idle key reaper configuration
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A limit override for a single key.
///
/// Listed rather than keyed by name so that keys keep their exact spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLimit {
    /// The key this limit applies to
    pub key: String,
    /// Maximum admissions allowed in the window
    pub max_admissions: i64,
    /// Window length in milliseconds
    pub window_ms: i64,
}

impl KeyLimit {
    /// The untyped limit carried by this entry.
    pub fn spec(&self) -> LimitSpec {
        LimitSpec {
            max_admissions: self.max_admissions,
            window_ms: self.window_ms,
        }
    }
}

/// Idle key reaper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Whether to run the reaper at all
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,

    /// Milliseconds between reaping passes
    #[serde(default = "default_reaper_interval")]
    pub interval_ms: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_ms: default_reaper_interval(),
        }
    }
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_interval() -> u64 {
    1000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GateConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from defaults, an optional YAML file, and
    /// `SLIDEGATE__*` environment variables, in increasing precedence.
    ///
    /// Nested fields are separated by a double underscore, e.g.
    /// `SLIDEGATE__DEFAULT_LIMIT__MAX_ADMISSIONS=10`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_layered(path, None)
    }

    fn load_layered(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&GateConfig::default())?);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: GateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check every limit and the reaper settings.
    ///
    /// Fails with [`GateError::InvalidConfiguration`] on the first bad value.
    pub fn validate(&self) -> Result<()> {
        Limit::try_from(self.default_limit)?;

        for entry in &self.limits {
            Limit::try_from(entry.spec()).map_err(|e| {
                GateError::InvalidConfiguration(format!("limit for key {:?}: {}", entry.key, e))
            })?;
        }

        if self.reaper.enabled && self.reaper.interval_ms == 0 {
            return Err(GateError::InvalidConfiguration(
                "reaper.interval_ms must be positive when the reaper is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.default_limit.max_admissions, 5);
        assert_eq!(config.default_limit.window_ms, 2000);
        assert!(config.limits.is_empty());
        assert!(config.reaper.enabled);
        assert_eq!(config.logging.level, "info");
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
default_limit:
  max_admissions: 100
  window_ms: 60000
limits:
  - key: "user:Alice"
    max_admissions: 1
    window_ms: 2000
  - key: "10.0.0.1"
    max_admissions: 0
    window_ms: 1000
reaper:
  interval_ms: 250
logging:
  level: debug
  json: true
"#;
        let config = assert_ok!(GateConfig::from_yaml(yaml));
        assert_eq!(config.default_limit.max_admissions, 100);
        assert_eq!(config.limits.len(), 2);
        assert_eq!(config.limits[0].key, "user:Alice");
        assert_eq!(config.limits[1].spec().max_admissions, 0);
        assert!(config.reaper.enabled);
        assert_eq!(config.reaper.interval_ms, 250);
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = assert_ok!(GateConfig::from_yaml("limits: []\n"));
        assert_eq!(config.default_limit, LimitSpec::default());
        assert_eq!(config.reaper.interval_ms, 1000);
    }

    #[test]
    fn test_negative_admissions_rejected() {
        let yaml = r#"
limits:
  - key: bad
    max_admissions: -1
    window_ms: 1000
"#;
        let err = assert_err!(GateConfig::from_yaml(yaml));
        assert!(matches!(err, GateError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
default_limit:
  max_admissions: 5
  window_ms: 0
"#;
        let err = assert_err!(GateConfig::from_yaml(yaml));
        assert!(matches!(err, GateError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_zero_reaper_interval_rejected() {
        let err = assert_err!(GateConfig::from_yaml("reaper:\n  interval_ms: 0\n"));
        assert!(matches!(err, GateError::InvalidConfiguration(_)));

        assert_ok!(GateConfig::from_yaml(
            "reaper:\n  enabled: false\n  interval_ms: 0\n"
        ));
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = assert_err!(GateConfig::from_yaml("default_limit: [1, 2"));
        assert!(matches!(err, GateError::Config(_)));
    }

    #[test]
    fn test_layered_env_overrides_defaults() {
        let env = HashMap::from([
            (
                "SLIDEGATE__DEFAULT_LIMIT__MAX_ADMISSIONS".to_string(),
                "42".to_string(),
            ),
            ("SLIDEGATE__REAPER__ENABLED".to_string(), "false".to_string()),
        ]);

        let config = assert_ok!(GateConfig::load_layered(None, Some(env)));
        assert_eq!(config.default_limit.max_admissions, 42);
        assert_eq!(config.default_limit.window_ms, 2000);
        assert!(!config.reaper.enabled);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert_err!(GateConfig::load(Some(Path::new(
            "/nonexistent/slidegate.yaml"
        ))));
    }
}
