//! Caller-facing clients for the turn chain
//!
//! - [`WebSocketClient`]: binary PCM frames in, JSON events and binary audio out
//! - `LocalClient` (feature `local-audio`): microphone in, speaker and stdout out

pub mod websocket;

#[cfg(feature = "local-audio")]
pub mod local;

pub use websocket::{classify_frame, event_frame, Inbound, WebSocketClient};

#[cfg(feature = "local-audio")]
pub use local::LocalClient;

use thiserror::Error;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Transport closed")]
    Closed,
}

impl From<axum::Error> for TransportError {
    fn from(err: axum::Error) -> Self {
        TransportError::WebSocket(err.to_string())
    }
}

impl From<TransportError> for voice_chain_core::Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => voice_chain_core::Error::Connection(err.to_string()),
            other => voice_chain_core::Error::Transport(other.to_string()),
        }
    }
}
