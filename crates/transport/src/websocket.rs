//! WebSocket client
//!
//! Wire contract:
//! - inbound binary frames carry raw PCM16 audio;
//! - inbound `{"type":"end"}` text frame or a close frame ends the input;
//! - outbound events are JSON text frames, outbound audio is binary frames.

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use voice_chain_core::{ConversationClient, Error, Message, Result};

use crate::TransportError;

/// What an inbound frame means for the chain
#[derive(Debug, PartialEq)]
pub enum Inbound {
    Audio(Vec<u8>),
    /// Caller finished sending
    End,
    /// Keep-alives and unknown text frames
    Ignore,
}

/// Classify one inbound frame
pub fn classify_frame(frame: WsMessage) -> Inbound {
    match frame {
        WsMessage::Binary(audio) => Inbound::Audio(audio),
        WsMessage::Close(_) => Inbound::End,
        WsMessage::Text(text) => {
            let is_end = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "end"))
                .unwrap_or(false);
            if is_end {
                Inbound::End
            } else {
                Inbound::Ignore
            }
        }
        WsMessage::Ping(_) | WsMessage::Pong(_) => Inbound::Ignore,
    }
}

/// JSON text frame for a message, if the caller should see it
pub fn event_frame(message: &Message) -> Result<Option<WsMessage>> {
    match message.to_event() {
        Some(event) => Ok(Some(WsMessage::Text(event.to_json()?))),
        None => Ok(None),
    }
}

/// One upgraded WebSocket connection
///
/// The socket is split so input and output can be driven from different tasks.
pub struct WebSocketClient {
    sink: Mutex<SplitSink<WebSocket, WsMessage>>,
    stream: Mutex<SplitStream<WebSocket>>,
    session_id: String,
    closed: AtomicBool,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
}

impl WebSocketClient {
    pub fn new(socket: WebSocket, session_id: impl Into<String>) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            session_id: session_id.into(),
            closed: AtomicBool::new(false),
            frames_in: AtomicU64::new(0),
            frames_out: AtomicU64::new(0),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: WsMessage) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed.into());
        }
        self.sink
            .lock()
            .await
            .send(frame)
            .await
            .map_err(TransportError::from)?;
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl ConversationClient for WebSocketClient {
    async fn connect(&self) -> Result<()> {
        // The HTTP upgrade has already accepted the socket
        if self.is_closed() {
            return Err(Error::Connection("socket already closed".into()));
        }
        tracing::debug!(session_id = %self.session_id, "WebSocket client connected");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(WsMessage::Close(None)).await {
            tracing::debug!(session_id = %self.session_id, error = %e, "Close frame not delivered");
        }
        let _ = sink.close().await;

        tracing::info!(
            session_id = %self.session_id,
            frames_in = self.frames_in.load(Ordering::Relaxed),
            frames_out = self.frames_out.load(Ordering::Relaxed),
            "WebSocket client closed"
        );
        Ok(())
    }

    async fn next_input(&self) -> Option<Result<Vec<u8>>> {
        let mut stream = self.stream.lock().await;
        loop {
            let frame = match stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(TransportError::from(e).into())),
            };

            match classify_frame(frame) {
                Inbound::Audio(audio) => {
                    let n = self.frames_in.fetch_add(1, Ordering::Relaxed) + 1;
                    if n % 100 == 0 {
                        tracing::debug!(
                            session_id = %self.session_id,
                            frames = n,
                            bytes = audio.len(),
                            "WebSocket audio received"
                        );
                    }
                    return Some(Ok(audio));
                }
                Inbound::End => {
                    tracing::info!(session_id = %self.session_id, "Caller ended input");
                    return None;
                }
                Inbound::Ignore => continue,
            }
        }
    }

    async fn emit(&self, message: &Message) -> Result<()> {
        match event_frame(message)? {
            Some(frame) => self.send(frame).await,
            None => Ok(()),
        }
    }

    async fn emit_audio(&self, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }
        self.send(WsMessage::Binary(audio.to_vec())).await
    }

    fn kind(&self) -> &'static str {
        "websocket"
    }
}
