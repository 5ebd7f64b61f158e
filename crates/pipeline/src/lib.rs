//! Turn orchestration for real-time voice conversations
//!
//! Components, leaves first:
//! - [`TurnBuffer`]: debounces recognized fragments into one query per turn
//! - [`EventBridge`]: adapts engine callbacks into bounded, drop-new queues
//! - [`StepMachine`]: the single authoritative holder of the current [`Step`]
//! - [`TurnChain`]: owns the engines and runs the intake, collect, dispatch and
//!   relay loops
//! - [`stt`] / [`tts`]: OpenAI-compatible HTTP speech engines
//!
//! [`Step`]: voice_chain_core::Step

pub mod bridge;
pub mod orchestrator;
pub mod state;
pub mod stt;
pub mod tts;
pub mod turn_buffer;

pub use bridge::{AudioEvent, BridgeReceivers, EventBridge, TextEvent};
pub use orchestrator::{ChainConfig, EngineFactory, Engines, TurnChain};
pub use state::StepMachine;
pub use stt::{HttpStt, HttpSttConfig};
pub use tts::{HttpTts, HttpTtsConfig};
pub use turn_buffer::{TurnBuffer, TurnBufferConfig};

use thiserror::Error;
use voice_chain_core::Step;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid transition {from} -> {to} (current step: {current})")]
    InvalidTransition { from: Step, to: Step, current: Step },

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error(transparent)]
    Core(#[from] voice_chain_core::Error),
}

impl From<PipelineError> for voice_chain_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Connection(msg) => voice_chain_core::Error::Connection(msg),
            PipelineError::InvalidTransition { from, to, current } => {
                voice_chain_core::Error::InvalidTransition { from, to, current }
            }
            PipelineError::Stt(msg) => voice_chain_core::Error::Stt(msg),
            PipelineError::Tts(msg) => voice_chain_core::Error::Tts(msg),
            PipelineError::Core(inner) => inner,
            other => voice_chain_core::Error::Pipeline(other.to_string()),
        }
    }
}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        PipelineError::Audio(err.to_string())
    }
}
