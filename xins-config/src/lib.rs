use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Names of the calling conventions a server can be configured with.
pub const KNOWN_CONVENTIONS: [&str; 3] = ["_xins-std", "_xins-xml", "_xins-json"];

/// Errors raised while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// XINS server configuration loaded from YAML.
///
/// This structure defines the listen addresses, the API identity, timeout
/// settings, metrics configuration and which calling conventions are active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// List of addresses to listen on (e.g., "0.0.0.0:8080", "[::]:8080")
    pub listen_addrs: Vec<String>,
    /// Name of the API served, reported by the `_GetVersion` meta function
    pub api_name: String,
    /// Timeout configuration for request handling
    pub timeouts: Timeouts,
    /// Prometheus metrics configuration
    pub metrics: Metrics,
    /// Convention used when a request does not name one (default: "_xins-std")
    #[serde(default)]
    pub default_convention: Option<String>,
    /// Per-convention switches (all enabled if not specified)
    #[serde(default)]
    pub conventions: Option<Conventions>,
    /// Maximum accepted request body size in bytes (default: 1 MiB if not specified)
    #[serde(default)]
    pub max_body_size: Option<usize>,
    /// Graceful shutdown timeout in seconds (default: 30 if not specified)
    #[serde(default)]
    pub shutdown_timeout: Option<u64>,
}

/// Switches for the optional calling conventions.
///
/// The standard convention is always active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conventions {
    #[serde(default)]
    pub xml: ConventionSwitch,
    #[serde(default)]
    pub json: ConventionSwitch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConventionSwitch {
    /// Whether the convention accepts requests (default: true)
    #[serde(default = "default_convention_enabled")]
    pub enabled: bool,
}

fn default_convention_enabled() -> bool {
    true
}

impl Default for ConventionSwitch {
    fn default() -> Self {
        Self {
            enabled: default_convention_enabled(),
        }
    }
}

/// Timeout settings for request handling (all values in seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Maximum time to receive a complete request body
    pub request_read: u64,
    /// Maximum idle time for keep-alive connections
    pub idle: u64,
}

/// Prometheus metrics server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Whether to enable metrics collection
    pub enabled: bool,
    /// Address to bind metrics HTTP server (e.g., "127.0.0.1:9000")
    pub address: String,
}

pub const DEFAULT_CONVENTION: &str = "_xins-std";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;
pub const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

impl Config {
    /// Loads configuration from a YAML file and validates it.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use xins_config::Config;
    /// use std::path::Path;
    ///
    /// let config = Config::from_file(Path::new("config.yaml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parses configuration from a YAML string and validates it.
    ///
    /// # Examples
    ///
    /// ```
    /// use xins_config::Config;
    ///
    /// let yaml = r#"
    /// listen_addrs:
    ///   - "0.0.0.0:8080"
    /// api_name: "petstore"
    /// timeouts:
    ///   request_read: 30
    ///   idle: 300
    /// metrics:
    ///   enabled: true
    ///   address: "127.0.0.1:9000"
    /// "#;
    ///
    /// let config = Config::parse(yaml).unwrap();
    /// assert_eq!(config.listen_addrs[0], "0.0.0.0:8080");
    /// assert_eq!(config.default_convention(), "_xins-std");
    /// ```
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml_ng::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addrs.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one listen address is required".to_string(),
            ));
        }
        if self.max_body_size == Some(0) {
            return Err(ConfigError::Invalid(
                "max_body_size must be greater than zero".to_string(),
            ));
        }
        let default = self.default_convention();
        if !KNOWN_CONVENTIONS.contains(&default) {
            return Err(ConfigError::Invalid(format!(
                "unknown default convention \"{}\"",
                default
            )));
        }
        if !self.convention_enabled(default) {
            return Err(ConfigError::Invalid(format!(
                "default convention \"{}\" is disabled",
                default
            )));
        }
        Ok(())
    }

    pub fn default_convention(&self) -> &str {
        self.default_convention
            .as_deref()
            .unwrap_or(DEFAULT_CONVENTION)
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE)
    }

    pub fn shutdown_timeout(&self) -> u64 {
        self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Whether the named convention should be registered.
    ///
    /// Unknown names are reported as disabled.
    pub fn convention_enabled(&self, name: &str) -> bool {
        let conventions = self.conventions.clone().unwrap_or_default();
        match name {
            "_xins-std" => true,
            "_xins-xml" => conventions.xml.enabled,
            "_xins-json" => conventions.json.enabled,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
listen_addrs:
  - "0.0.0.0:8080"
  - "[::]:8080"
api_name: "petstore"
timeouts:
  request_read: 30
  idle: 300
metrics:
  enabled: true
  address: "127.0.0.1:9000"
"#;

    #[test]
    fn test_valid_config_parsing() {
        let config = Config::parse(BASE).unwrap();
        assert_eq!(config.listen_addrs.len(), 2);
        assert_eq!(config.listen_addrs[0], "0.0.0.0:8080");
        assert_eq!(config.api_name, "petstore");
        assert_eq!(config.timeouts.request_read, 30);
        assert_eq!(config.timeouts.idle, 300);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "127.0.0.1:9000");
        assert!(config.conventions.is_none());
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse(BASE).unwrap();
        assert_eq!(config.default_convention(), "_xins-std");
        assert_eq!(config.max_body_size(), DEFAULT_MAX_BODY_SIZE);
        assert_eq!(config.shutdown_timeout(), 30);
        assert!(config.convention_enabled("_xins-xml"));
        assert!(config.convention_enabled("_xins-json"));
        assert!(!config.convention_enabled("_xins-soap"));
    }

    #[test]
    fn test_disabled_convention() {
        let yaml = format!("{}conventions:\n  json:\n    enabled: false\n", BASE);
        let config = Config::parse(&yaml).unwrap();
        assert!(!config.convention_enabled("_xins-json"));
        assert!(config.convention_enabled("_xins-xml"));
    }

    #[test]
    fn test_unknown_default_convention() {
        let yaml = format!("{}default_convention: \"_xins-soap\"\n", BASE);
        let err = Config::parse(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_disabled_default_convention() {
        let yaml = format!(
            "{}default_convention: \"_xins-json\"\nconventions:\n  json:\n    enabled: false\n",
            BASE
        );
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_zero_body_size_rejected() {
        let yaml = format!("{}max_body_size: 0\n", BASE);
        assert!(Config::parse(&yaml).is_err());
    }

    #[test]
    fn test_missing_required_field() {
        let yaml = r#"
listen_addrs:
  - "0.0.0.0:8080"
timeouts:
  request_read: 30
  idle: 300
metrics:
  enabled: false
  address: "127.0.0.1:9000"
"#;
        let result = Config::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_empty_listen_addrs() {
        let yaml = BASE.replace("  - \"0.0.0.0:8080\"\n  - \"[::]:8080\"\n", "");
        let yaml = yaml.replace("listen_addrs:\n", "listen_addrs: []\n");
        assert!(matches!(Config::parse(&yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_yaml() {
        let yaml = "invalid: yaml: content: ::::";
        assert!(Config::parse(yaml).is_err());
    }

    #[test]
    fn test_empty_config() {
        assert!(Config::parse("").is_err());
    }
}
