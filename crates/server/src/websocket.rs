//! WebSocket handler
//!
//! One connection, one turn chain. The chain runs until the caller goes away or
//! a loop fails; the handler only registers it and waits.

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use std::sync::Arc;
use voice_chain_core::ConversationClient;
use voice_chain_pipeline::{ChainConfig, TurnChain};
use voice_chain_transport::WebSocketClient;

use crate::metrics::record_session_started;
use crate::state::AppState;
use crate::ServerError;

/// `GET /ws`
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(session_id = %session_id, "WebSocket connected");

    let client = Arc::new(WebSocketClient::new(socket, session_id.clone()));
    match run_session(&state, session_id.clone(), client).await {
        Ok(()) => tracing::info!(session_id = %session_id, "WebSocket session ended"),
        Err(e) => tracing::warn!(session_id = %session_id, error = %e, "WebSocket session failed"),
    }
}

/// Build, register and run a chain for `client` until it stops
pub async fn run_session(
    state: &AppState,
    session_id: String,
    client: Arc<dyn ConversationClient>,
) -> Result<(), ServerError> {
    let config = ChainConfig::from(&state.config.chain);
    let chain = match TurnChain::new(
        session_id.clone(),
        config,
        Arc::clone(&client),
        state.engines.as_ref(),
    ) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            if let Err(close_err) = client.close().await {
                tracing::debug!(session_id = %session_id, error = %close_err, "Close after failed setup");
            }
            return Err(e.into());
        }
    };

    state.sessions.insert(Arc::clone(&chain));
    record_session_started();

    let result = chain.start().await;
    if result.is_ok() {
        chain.wait().await;
    }

    state.sessions.remove(&session_id);
    result.map_err(ServerError::from)
}
