use std::time::Duration;

/// Environment variable selecting the sessh executable
pub const SESSH_BIN_ENV: &str = "SESSH_BIN";

/// Executable used when `SESSH_BIN` is unset or empty
pub const DEFAULT_SESSH_BIN: &str = "sessh";

/// Flag forcing sessh into machine-readable output
pub const JSON_ENV_NAME: &str = "SESSH_JSON";
pub const JSON_ENV_VALUE: &str = "1";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Adapter configuration, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path or name of the sessh executable
    pub sessh_bin: String,
    /// Per-call limit; `None` lets a hung sessh hang its call indefinitely
    pub call_timeout: Option<Duration>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessh_bin: DEFAULT_SESSH_BIN.to_string(),
            call_timeout: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(bin) = lookup(SESSH_BIN_ENV).filter(|v| !v.trim().is_empty()) {
            config.sessh_bin = bin;
        }
        if let Some(level) = lookup("RUST_LOG").filter(|v| !v.trim().is_empty()) {
            config.logging.level = level;
        }

        config
    }

    pub fn with_sessh_bin(mut self, bin: impl Into<String>) -> Self {
        self.sessh_bin = bin.into();
        self
    }

    /// Set the per-call timeout in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.call_timeout = Some(Duration::from_secs(seconds));
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.logging.json_format = enabled;
        self
    }

    /// The environment pair handed to every sessh child process
    pub fn json_env(&self) -> (&'static str, &'static str) {
        (JSON_ENV_NAME, JSON_ENV_VALUE)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.sessh_bin.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sessh executable path must not be empty".to_string(),
            ));
        }

        if self.call_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Validation(
                "call timeout must be greater than zero".to_string(),
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        tracing::debug!(sessh_bin = %self.sessh_bin, "Configuration validated");
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string, e.g. `info` or `info,sessh_mcp=debug`
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sessh_bin, "sessh");
        assert!(config.call_timeout.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sessh_bin_from_env() {
        let config = Config::from_lookup(lookup_from(&[("SESSH_BIN", "/opt/bin/sessh")]));
        assert_eq!(config.sessh_bin, "/opt/bin/sessh");
    }

    #[test]
    fn test_empty_sessh_bin_falls_back() {
        let config = Config::from_lookup(lookup_from(&[("SESSH_BIN", "  ")]));
        assert_eq!(config.sessh_bin, DEFAULT_SESSH_BIN);
    }

    #[test]
    fn test_rust_log_overrides_level() {
        let config = Config::from_lookup(lookup_from(&[("RUST_LOG", "debug")]));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_json_env_pair() {
        assert_eq!(Config::default().json_env(), ("SESSH_JSON", "1"));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let config = Config::default().with_timeout(0);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_empty_bin() {
        let config = Config::default().with_sessh_bin("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builders() {
        let config = Config::default()
            .with_sessh_bin("/usr/local/bin/sessh")
            .with_timeout(30)
            .with_log_level("warn")
            .with_json_logs(true);
        assert_eq!(config.call_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }
}
