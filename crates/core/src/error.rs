//! Error types shared across the voice chain crates

use crate::conversation::Step;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid transition {from} -> {to} (current step: {current})")]
    InvalidTransition { from: Step, to: Step, current: Step },

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transport errors end the session; callers must reconnect.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Connection(_))
    }

    /// Engine errors abort the in-flight turn.
    pub fn is_engine(&self) -> bool {
        matches!(self, Error::Stt(_) | Error::Tts(_) | Error::Llm(_))
    }
}
