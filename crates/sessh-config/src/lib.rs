pub mod config;

pub use config::{
    Config, ConfigError, ConfigResult, LoggingConfig, DEFAULT_SESSH_BIN, JSON_ENV_NAME,
    JSON_ENV_VALUE, SESSH_BIN_ENV,
};
