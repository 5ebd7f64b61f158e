//! Configuration management for the voice turn chain
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default`, `config/{env}`)
//! - Environment variables (`VOICE_CHAIN__` prefix, `__` separator)
//!
//! Engine credentials and endpoints are plain config objects handed to each
//! adapter's constructor; nothing here is global.

pub mod chain;
pub mod engines;
pub mod settings;

pub use chain::{ChainSettings, LocalSettings, ListenTrigger};
pub use engines::{LlmSettings, SttSettings, TtsSettings};
pub use settings::{
    load_settings, load_settings_from, ModelsConfig, ObservabilityConfig, ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
