//! Voice Chain Server
//!
//! HTTP and WebSocket endpoints around the turn chain. Each `/ws` connection
//! gets its own chain; the server only keeps a registry of running chains so it
//! can stop them on shutdown.

pub mod engines;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use engines::HttpEngineFactory;
pub use http::create_router;
pub use logging::init_tracing;
pub use metrics::init_metrics;
pub use state::{AppState, SessionRegistry};

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<voice_chain_pipeline::PipelineError> for ServerError {
    fn from(err: voice_chain_pipeline::PipelineError) -> Self {
        use voice_chain_pipeline::PipelineError;
        match err {
            PipelineError::Connection(msg) => ServerError::WebSocket(msg),
            other => ServerError::Engine(other.to_string()),
        }
    }
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Session(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Engine(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
