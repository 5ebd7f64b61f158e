//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{ChainSettings, ConfigError, LlmSettings, LocalSettings, SttSettings, TtsSettings};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,

    /// Turn chain timing and queues
    #[serde(default)]
    pub chain: ChainSettings,

    #[serde(default)]
    pub stt: SttSettings,

    #[serde(default)]
    pub tts: TtsSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    /// Models advertised by `/models`
    #[serde(default)]
    pub models: ModelsConfig,

    /// Local microphone/speaker client
    #[serde(default)]
    pub local: LocalSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_chain()?;
        self.validate_engines()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "Port cannot be 0"));
        }
        Ok(())
    }

    fn validate_chain(&self) -> Result<(), ConfigError> {
        let chain = &self.chain;

        if chain.text_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "chain.text_queue_capacity",
                "Queue capacity must be greater than 0",
            ));
        }
        if chain.audio_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "chain.audio_queue_capacity",
                "Queue capacity must be greater than 0",
            ));
        }
        if chain.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "chain.poll_interval_ms",
                "Poll interval must be greater than 0",
            ));
        }
        if chain.final_quiet_ms > chain.hard_timeout_ms {
            return Err(ConfigError::invalid(
                "chain.final_quiet_ms",
                format!(
                    "Must not exceed chain.hard_timeout_ms ({} > {})",
                    chain.final_quiet_ms, chain.hard_timeout_ms
                ),
            ));
        }
        if chain.turn_done_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "chain.turn_done_timeout_ms",
                "Timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    fn validate_engines(&self) -> Result<(), ConfigError> {
        if self.stt.sample_rate == 0 {
            return Err(ConfigError::invalid("stt.sample_rate", "Must be positive"));
        }
        if self.tts.sample_rate == 0 {
            return Err(ConfigError::invalid("tts.sample_rate", "Must be positive"));
        }
        if self.local.sample_rate != self.stt.sample_rate {
            return Err(ConfigError::invalid(
                "local.sample_rate",
                format!(
                    "Capture rate {} does not match stt.sample_rate {}",
                    self.local.sample_rate, self.stt.sample_rate
                ),
            ));
        }
        if self.stt.window_ms < self.stt.silence_ms {
            return Err(ConfigError::invalid(
                "stt.window_ms",
                "Window must be at least as long as stt.silence_ms",
            ));
        }
        if self.llm.history_messages > 100 {
            return Err(ConfigError::invalid(
                "llm.history_messages",
                format!("Maximum 100, got {}", self.llm.history_messages),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::invalid(
                "llm.temperature",
                format!("Must be between 0.0 and 2.0, got {}", self.llm.temperature),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Empty means any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Directory holding `index.html` and other static assets
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_static_dir() -> String {
    "static".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            static_dir: default_static_dir(),
        }
    }
}

/// Model identifiers reported to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_available_models")]
    pub available: Vec<String>,
}

fn default_available_models() -> Vec<String> {
    vec!["qwen-plus".to_string()]
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            available: default_available_models(),
        }
    }
}

/// Logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    /// Also write a daily rolling log file here
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            log_dir: None,
            metrics_enabled: true,
        }
    }
}

/// Load settings from `config/` relative to the working directory
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Load settings from `dir/default`, `dir/{env}` and `VOICE_CHAIN__*` variables
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    // Load default config
    builder = builder.add_source(File::from(dir.join("default")).required(false));

    // Load environment-specific config
    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    // Load from environment variables
    builder = builder.add_source(
        Environment::with_prefix("VOICE_CHAIN")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
